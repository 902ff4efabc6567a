//! In-memory port implementations for tests
//!
//! `ScriptedExchange` plays back a queue of prices/errors; `InMemoryChain`
//! answers the JSON-RPC subset from fixture data and can inject failures.
//! Both record their calls so tests can assert on retry and fan-out counts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use super::chain::{BlockHeader, ChainError, ChainReader, LogEntry, LogFilter, TransactionInfo};
use super::exchange::{ExchangeClient, ExchangeError};
use crate::adapters::evm::abi::{self, IErc20HoldersCalls};
use crate::domain::{Exchange, PriceQuote, QuoteCurrency, TokenRef};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Scripted = Result<Decimal, ExchangeError>;

/// Exchange double that returns scripted outcomes in order, then a fallback
#[derive(Debug, Clone)]
pub struct ScriptedExchange {
    exchange: Exchange,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    fallback: Scripted,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<(Address, QuoteCurrency)>>>,
}

impl ScriptedExchange {
    /// A source that is unavailable until told otherwise
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Err(ExchangeError::SourceUnavailable("no response configured".into())),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every unscripted call with `price`
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.fallback = Ok(price);
        self
    }

    /// Answer every unscripted call with `error`
    pub fn with_error(mut self, error: ExchangeError) -> Self {
        self.fallback = Err(error);
        self
    }

    /// Queue one price ahead of the fallback
    pub fn then_price(self, price: Decimal) -> Self {
        lock(&self.script).push_back(Ok(price));
        self
    }

    /// Queue one error ahead of the fallback
    pub fn then_error(self, error: ExchangeError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Token and quote currency of every `fetch_price` call, in call order
    pub fn get_calls(&self) -> Vec<(Address, QuoteCurrency)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn fetch_price(&self, token: &TokenRef, quote: QuoteCurrency) -> Result<PriceQuote, ExchangeError> {
        lock(&self.calls).push((token.address, quote));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = lock(&self.script).pop_front().unwrap_or_else(|| self.fallback.clone());
        let price = outcome?;
        PriceQuote::new(token.clone(), self.exchange, price, quote, Utc::now())
            .map_err(|e| ExchangeError::SchemaMismatch(e.to_string()))
    }
}

/// State of one ERC-20 contract held by [`InMemoryChain`]
#[derive(Debug, Clone, Default)]
pub struct Erc20State {
    pub total_supply: U256,
    /// Entries served by `topHolders`, in enumeration order
    pub holders: Vec<(Address, U256)>,
    /// Whether the contract implements `topHolders`
    pub enumerable: bool,
}

impl Erc20State {
    pub fn new(total_supply: U256) -> Self {
        Self {
            total_supply,
            holders: Vec::new(),
            enumerable: true,
        }
    }

    pub fn with_holders(mut self, holders: Vec<(Address, U256)>) -> Self {
        self.holders = holders;
        self
    }

    pub fn without_enumeration(mut self) -> Self {
        self.enumerable = false;
        self
    }

    fn balance_of(&self, owner: Address) -> U256 {
        self.holders
            .iter()
            .filter(|(address, _)| *address == owner)
            .fold(U256::ZERO, |acc, (_, balance)| acc.saturating_add(*balance))
    }
}

/// Per-method call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainCalls {
    pub block_number: usize,
    pub get_logs: usize,
    pub block_by_number: usize,
    pub transaction_by_hash: usize,
    pub call: usize,
}

/// Seconds per block used for blocks without an explicit timestamp
pub const MOCK_BLOCK_TIME: u64 = 12;
/// Timestamp of block zero for blocks without an explicit timestamp
pub const MOCK_GENESIS_TIME: u64 = 1_700_000_000;

/// Chain double backed by fixture data
#[derive(Debug, Default)]
pub struct InMemoryChain {
    head: u64,
    logs: Vec<LogEntry>,
    block_times: HashMap<u64, u64>,
    transactions: HashMap<B256, TransactionInfo>,
    contracts: HashMap<Address, Erc20State>,
    fail_all: bool,
    failing_log_spans: HashSet<u64>,
    failing_blocks: HashSet<u64>,
    failing_chunks: HashSet<u64>,
    max_log_span: Option<u64>,
    log_delay: Option<Duration>,
    call_delay: Option<Duration>,
    flaky_log_calls: Mutex<usize>,
    calls: Mutex<ChainCalls>,
    filters: Mutex<Vec<LogFilter>>,
}

impl InMemoryChain {
    pub fn new(head: u64) -> Self {
        Self { head, ..Self::default() }
    }

    pub fn with_log(mut self, log: LogEntry) -> Self {
        self.logs.push(log);
        self
    }

    pub fn with_logs(mut self, logs: impl IntoIterator<Item = LogEntry>) -> Self {
        self.logs.extend(logs);
        self
    }

    pub fn with_block_time(mut self, number: u64, timestamp: u64) -> Self {
        self.block_times.insert(number, timestamp);
        self
    }

    pub fn with_transaction(mut self, tx: TransactionInfo) -> Self {
        self.transactions.insert(tx.hash, tx);
        self
    }

    pub fn with_contract(mut self, address: Address, state: Erc20State) -> Self {
        self.contracts.insert(address, state);
        self
    }

    /// Every call fails with a transport error
    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// `eth_getLogs` fails for filters starting at `from_block`
    pub fn fail_span(mut self, from_block: u64) -> Self {
        self.failing_log_spans.insert(from_block);
        self
    }

    /// `eth_getBlockByNumber` fails for this block
    pub fn fail_block(mut self, number: u64) -> Self {
        self.failing_blocks.insert(number);
        self
    }

    /// `eth_getLogs` over more than `max_blocks` blocks exceeds the result limit
    pub fn with_result_limit(mut self, max_blocks: u64) -> Self {
        self.max_log_span = Some(max_blocks);
        self
    }

    /// Sleep this long before answering `eth_getLogs`
    pub fn with_log_delay(mut self, delay: Duration) -> Self {
        self.log_delay = Some(delay);
        self
    }

    /// Sleep this long before answering `eth_call`
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// `topHolders` fails for this offset
    pub fn fail_chunk(mut self, offset: u64) -> Self {
        self.failing_chunks.insert(offset);
        self
    }

    /// The next `n` `eth_getLogs` calls are rate limited
    pub fn rate_limit_logs(self, n: usize) -> Self {
        *lock(&self.flaky_log_calls) = n;
        self
    }

    pub fn calls(&self) -> ChainCalls {
        *lock(&self.calls)
    }

    /// Every filter passed to `get_logs`, in call order
    pub fn log_filters(&self) -> Vec<LogFilter> {
        lock(&self.filters).clone()
    }

    /// Default timestamp for `number`
    pub fn block_time(number: u64) -> u64 {
        MOCK_GENESIS_TIME + number * MOCK_BLOCK_TIME
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.fail_all {
            return Err(ChainError::Transport("connection refused".into()));
        }
        Ok(())
    }

    fn effective_block(&self, log: &LogEntry) -> Option<u64> {
        log.block_number.or_else(|| {
            log.transaction_hash
                .and_then(|hash| self.transactions.get(&hash))
                .and_then(|tx| tx.block_number)
        })
    }

    fn answer_call(&self, contract: &Erc20State, call: IErc20HoldersCalls) -> Result<Bytes, ChainError> {
        match call {
            IErc20HoldersCalls::totalSupply(_) => Ok(abi::encode_uint(contract.total_supply)),
            IErc20HoldersCalls::balanceOf(call) => Ok(abi::encode_uint(contract.balance_of(call.owner))),
            IErc20HoldersCalls::topHolders(call) => {
                let offset = call.offset.saturating_to::<u64>();
                let count = call.count.saturating_to::<u64>();
                if !contract.enumerable {
                    return Err(ChainError::Reverted("execution reverted".into()));
                }
                if self.failing_chunks.contains(&offset) {
                    return Err(ChainError::Transport(format!("chunk at {} dropped", offset)));
                }
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(contract.holders.len());
                let end = start
                    .saturating_add(usize::try_from(count).unwrap_or(usize::MAX))
                    .min(contract.holders.len());
                Ok(abi::encode_holder_chunk(&contract.holders[start..end]))
            }
        }
    }
}

#[async_trait]
impl ChainReader for InMemoryChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        lock(&self.calls).block_number += 1;
        self.check_available()?;
        Ok(self.head)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError> {
        lock(&self.calls).get_logs += 1;
        lock(&self.filters).push(filter.clone());
        if let Some(delay) = self.log_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        {
            let mut flaky = lock(&self.flaky_log_calls);
            if *flaky > 0 {
                *flaky -= 1;
                return Err(ChainError::RateLimited);
            }
        }
        if self.failing_log_spans.contains(&filter.from_block) {
            return Err(ChainError::Transport(format!("span at {} dropped", filter.from_block)));
        }
        if let Some(max_blocks) = self.max_log_span {
            if filter.to_block.saturating_sub(filter.from_block) + 1 > max_blocks {
                return Err(ChainError::ResultLimit("query returned more than 10000 results".into()));
            }
        }

        Ok(self
            .logs
            .iter()
            .filter(|log| {
                let in_range = self
                    .effective_block(log)
                    .map_or(true, |b| b >= filter.from_block && b <= filter.to_block);
                in_range && filter.matches(log)
            })
            .cloned()
            .collect())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHeader>, ChainError> {
        lock(&self.calls).block_by_number += 1;
        self.check_available()?;
        if self.failing_blocks.contains(&number) {
            return Err(ChainError::Transport(format!("block {} unavailable", number)));
        }
        if number > self.head {
            return Ok(None);
        }
        let timestamp = self
            .block_times
            .get(&number)
            .copied()
            .unwrap_or_else(|| Self::block_time(number));
        Ok(Some(BlockHeader { number, timestamp }))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TransactionInfo>, ChainError> {
        lock(&self.calls).transaction_by_hash += 1;
        self.check_available()?;
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        lock(&self.calls).call += 1;
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        let contract = self
            .contracts
            .get(&to)
            .ok_or_else(|| ChainError::Reverted(format!("no contract at {}", to)))?;
        let call = abi::decode_call(&data)
            .ok_or_else(|| ChainError::Reverted("unknown selector".into()))?;
        self.answer_call(contract, call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_scripted_exchange_plays_script_then_fallback() {
        let mock = ScriptedExchange::new(Exchange::Binance)
            .with_price(dec!(2))
            .then_error(ExchangeError::RateLimited { retry_after: None })
            .then_price(dec!(1));
        let token = TokenRef::new(Address::repeat_byte(1));

        assert!(mock.fetch_price(&token, QuoteCurrency::Usdt).await.is_err());
        assert_eq!(mock.fetch_price(&token, QuoteCurrency::Usdt).await.unwrap().price(), dec!(1));
        assert_eq!(mock.fetch_price(&token, QuoteCurrency::Usdt).await.unwrap().price(), dec!(2));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_in_memory_chain_filters_logs_by_range() {
        let token = Address::repeat_byte(0xaa);
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let chain = InMemoryChain::new(100)
            .with_log(abi::encode_transfer_log(token, a, b, U256::from(5), 10, B256::repeat_byte(1), 0))
            .with_log(abi::encode_transfer_log(token, a, b, U256::from(6), 50, B256::repeat_byte(2), 0));

        let filter = LogFilter {
            address: token,
            from_block: 0,
            to_block: 20,
            topics: vec![Some(abi::transfer_topic())],
        };
        let logs = chain.get_logs(&filter).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(chain.calls().get_logs, 1);
    }

    #[tokio::test]
    async fn test_in_memory_chain_answers_erc20_calls() {
        let token = Address::repeat_byte(0xaa);
        let holder = Address::repeat_byte(7);
        let chain = InMemoryChain::new(1).with_contract(
            token,
            Erc20State::new(U256::from(10)).with_holders(vec![(holder, U256::from(4))]),
        );

        let supply = chain.call(token, abi::encode_total_supply()).await.unwrap();
        assert_eq!(abi::decode_uint(&supply).unwrap(), U256::from(10));

        let balance = chain.call(token, abi::encode_balance_of(holder)).await.unwrap();
        assert_eq!(abi::decode_uint(&balance).unwrap(), U256::from(4));

        let chunk = chain.call(token, abi::encode_top_holders(0, 100)).await.unwrap();
        assert_eq!(abi::decode_holder_chunk(&chunk).unwrap(), vec![(holder, U256::from(4))]);
    }

    #[tokio::test]
    async fn test_in_memory_chain_enforces_result_limit() {
        let token = Address::repeat_byte(0xaa);
        let chain = InMemoryChain::new(100).with_result_limit(10);
        let filter = |from_block, to_block| LogFilter {
            address: token,
            from_block,
            to_block,
            topics: vec![Some(abi::transfer_topic())],
        };

        assert!(matches!(chain.get_logs(&filter(0, 10)).await, Err(ChainError::ResultLimit(_))));
        assert!(chain.get_logs(&filter(0, 9)).await.unwrap().is_empty());
    }
}
