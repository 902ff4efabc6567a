//! Chain Event Scanner
//!
//! Reconstructs a wallet's token history from ERC-20 `Transfer` logs. The
//! block range is split into spans fetched concurrently; each span issues
//! one `eth_getLogs` for transfers out of the wallet and one for transfers
//! into it. Logs are de-duplicated by (transaction hash, log index) and
//! stamped with their block's timestamp, read once per distinct block.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::retry::{within, RetryPolicy};
use crate::adapters::evm::abi;
use crate::domain::{TokenRef, TransactionRecord, TransferEvent};
use crate::ports::chain::{ChainError, ChainReader, LogEntry, LogFilter};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(ChainError),

    #[error("Invalid scan range: {0}")]
    InvalidRange(String),

    #[error("No span finished within {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Average block interval used to turn a time window into blocks
    pub avg_block_time: Duration,
    /// Largest block range sent in one `eth_getLogs`
    pub max_block_span: u64,
    /// Spans in flight at once
    pub span_concurrency: usize,
    pub retry: RetryPolicy,
    /// Deadline for a whole scan; spans unfinished by then are reported
    /// as failed. `None` waits for every span.
    pub call_timeout: Option<Duration>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            avg_block_time: Duration::from_secs(12),
            max_block_span: 10_000,
            span_concurrency: 4,
            retry: RetryPolicy::default(),
            call_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Blocks or wall-clock interval to scan, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRange {
    Blocks { from: u64, to: u64 },
    Window { start: DateTime<Utc>, end: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSpan {
    pub from: u64,
    pub to: u64,
}

/// A wallet's transfers of one token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransfers {
    pub token: TokenRef,
    pub wallet: Address,
    pub from_block: u64,
    pub to_block: u64,
    /// Ordered by block, log index, outgoing before incoming
    pub records: Vec<TransactionRecord>,
    /// Spans whose logs could not be read, or were not read before the
    /// call deadline. Transfers in them are left out.
    pub failed_spans: Vec<BlockSpan>,
    /// Logs dropped as malformed
    pub skipped: usize,
}

/// Every transfer of one token in a block range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransfers {
    pub token: TokenRef,
    pub from_block: u64,
    pub to_block: u64,
    pub events: Vec<TransferEvent>,
    pub failed_spans: Vec<BlockSpan>,
    pub skipped: usize,
}

struct Collected {
    events: Vec<TransferEvent>,
    failed_spans: Vec<BlockSpan>,
    skipped: usize,
}

pub struct ChainEventScanner<C: ChainReader + ?Sized> {
    chain: Arc<C>,
    config: ScannerConfig,
}

impl<C: ChainReader + ?Sized> ChainEventScanner<C> {
    pub fn new(chain: Arc<C>, config: ScannerConfig) -> Self {
        Self { chain, config }
    }

    /// Transfers into or out of `wallet` within `range`
    pub async fn scan_transfers(
        &self,
        token: &TokenRef,
        wallet: Address,
        range: ScanRange,
    ) -> Result<WalletTransfers, ScanError> {
        let (from_block, to_block) = self.resolve(range).await?;
        tracing::info!(token = %token.label(), %wallet, from_block, to_block, "Scanning transfers");

        let wallet_topic = abi::address_topic(wallet);
        let topic_sets = vec![
            vec![Some(abi::transfer_topic()), Some(wallet_topic)],
            vec![Some(abi::transfer_topic()), None, Some(wallet_topic)],
        ];
        let collected = self.collect(token, from_block, to_block, topic_sets).await?;

        let mut records: Vec<TransactionRecord> = collected
            .events
            .iter()
            .filter(|event| match range {
                ScanRange::Window { start, end } => event.timestamp >= start && event.timestamp <= end,
                ScanRange::Blocks { .. } => true,
            })
            .flat_map(|event| TransactionRecord::for_wallet(event, wallet))
            .collect();
        records.sort_by_key(TransactionRecord::sort_key);

        Ok(WalletTransfers {
            token: token.clone(),
            wallet,
            from_block,
            to_block,
            records,
            failed_spans: collected.failed_spans,
            skipped: collected.skipped,
        })
    }

    /// Every transfer of `token` in the last `lookback_blocks` blocks
    pub async fn recent_transfers(
        &self,
        token: &TokenRef,
        lookback_blocks: u64,
    ) -> Result<TokenTransfers, ScanError> {
        let head = self.head().await?;
        let from_block = head.saturating_sub(lookback_blocks.saturating_sub(1));
        if lookback_blocks == 0 {
            return Ok(TokenTransfers {
                token: token.clone(),
                from_block: head,
                to_block: head,
                events: Vec::new(),
                failed_spans: Vec::new(),
                skipped: 0,
            });
        }

        let topic_sets = vec![vec![Some(abi::transfer_topic())]];
        let collected = self.collect(token, from_block, head, topic_sets).await?;
        Ok(TokenTransfers {
            token: token.clone(),
            from_block,
            to_block: head,
            events: collected.events,
            failed_spans: collected.failed_spans,
            skipped: collected.skipped,
        })
    }

    async fn head(&self) -> Result<u64, ScanError> {
        self.config
            .retry
            .run("eth_blockNumber", || self.chain.block_number())
            .await
            .map_err(ScanError::ChainUnavailable)
    }

    /// Inclusive block bounds for `range`
    async fn resolve(&self, range: ScanRange) -> Result<(u64, u64), ScanError> {
        match range {
            ScanRange::Blocks { from, to } => {
                if from > to {
                    return Err(ScanError::InvalidRange(format!("block {} is after block {}", from, to)));
                }
                Ok((from, to))
            }
            ScanRange::Window { start, end } => {
                if start > end {
                    return Err(ScanError::InvalidRange(format!("{} is after {}", start, end)));
                }
                let head = self.head().await?;
                let now = Utc::now();
                let block_secs = self.config.avg_block_time.as_secs().max(1);
                let blocks_back = |t: DateTime<Utc>| {
                    let secs = (now - t).num_seconds().max(0) as u64;
                    secs / block_secs
                };
                Ok((head.saturating_sub(blocks_back(start)), head.saturating_sub(blocks_back(end))))
            }
        }
    }

    fn spans(&self, from_block: u64, to_block: u64) -> Vec<BlockSpan> {
        let step = self.config.max_block_span.max(1);
        let mut spans = Vec::new();
        let mut start = from_block;
        loop {
            let end = start.saturating_add(step - 1).min(to_block);
            spans.push(BlockSpan { from: start, to: end });
            if end >= to_block {
                break;
            }
            start = end + 1;
        }
        spans
    }

    /// Logs of `span` for each topic set. A span over the endpoint's
    /// result limit is bisected until it fits or is a single block.
    async fn fetch_span(
        &self,
        token: Address,
        span: BlockSpan,
        topic_sets: &[Vec<Option<B256>>],
    ) -> Result<Vec<LogEntry>, ChainError> {
        let mut logs = Vec::new();
        for topics in topic_sets {
            let mut pending = vec![span];
            while let Some(part) = pending.pop() {
                let filter = LogFilter {
                    address: token,
                    from_block: part.from,
                    to_block: part.to,
                    topics: topics.clone(),
                };
                match self
                    .config
                    .retry
                    .run("eth_getLogs", || self.chain.get_logs(&filter))
                    .await
                {
                    Ok(batch) => logs.extend(batch),
                    Err(ChainError::ResultLimit(message)) if part.from < part.to => {
                        let mid = part.from + (part.to - part.from) / 2;
                        tracing::debug!(from = part.from, to = part.to, %message, "Splitting span over result limit");
                        pending.push(BlockSpan { from: mid + 1, to: part.to });
                        pending.push(BlockSpan { from: part.from, to: mid });
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(logs)
    }

    async fn collect(
        &self,
        token: &TokenRef,
        from_block: u64,
        to_block: u64,
        topic_sets: Vec<Vec<Option<B256>>>,
    ) -> Result<Collected, ScanError> {
        let deadline = self.config.call_timeout.map(|t| Instant::now() + t);
        let spans = self.spans(from_block, to_block);

        // Dropping the stream cancels spans still in flight
        let results: Vec<(BlockSpan, Result<Vec<LogEntry>, ChainError>)> = {
            let mut fetches = pin!(stream::iter(spans.iter().copied())
                .map(|span| {
                    let topic_sets = &topic_sets;
                    async move { (span, self.fetch_span(token.address, span, topic_sets).await) }
                })
                .buffered(self.config.span_concurrency.max(1)));
            let mut results = Vec::with_capacity(spans.len());
            while let Some(Some(result)) = within(deadline, fetches.next()).await {
                results.push(result);
            }
            results
        };

        // `buffered` yields in order, so the unfinished spans are the tail
        let mut failed_spans: BTreeSet<BlockSpan> = spans[results.len()..].iter().copied().collect();
        let mut timed_out = !failed_spans.is_empty();
        if timed_out {
            tracing::warn!(unfinished = failed_spans.len(), "Call deadline reached while reading logs");
        }

        let mut last_error = None;
        let mut unique: BTreeMap<(B256, u64), (BlockSpan, LogEntry)> = BTreeMap::new();
        let mut skipped = 0usize;

        for (span, result) in results {
            match result {
                Ok(logs) => {
                    for log in logs {
                        if log.removed {
                            continue;
                        }
                        match (log.transaction_hash, log.log_index) {
                            (Some(hash), Some(index)) => {
                                unique.entry((hash, index)).or_insert((span, log));
                            }
                            _ => {
                                tracing::warn!(?log, "Skipping log without transaction hash or index");
                                skipped += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(from = span.from, to = span.to, error = %e, "Span failed");
                    failed_spans.insert(span);
                    last_error = Some(e);
                }
            }
        }

        let mut located = Vec::with_capacity(unique.len());
        for ((hash, index), (span, log)) in unique {
            let decoded = match abi::decode_transfer(&log) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(tx = %hash, log_index = index, error = %e, "Skipping malformed Transfer log");
                    skipped += 1;
                    continue;
                }
            };
            let block = match log.block_number {
                Some(block) => Some(block),
                None => match within(deadline, self.block_of_transaction(hash)).await {
                    Some(block) => block?,
                    None => {
                        timed_out = true;
                        failed_spans.insert(span);
                        continue;
                    }
                },
            };
            match block {
                Some(block) => located.push((span, hash, index, block, decoded)),
                None => {
                    tracing::warn!(tx = %hash, "Skipping transfer with no block");
                    skipped += 1;
                }
            }
        }

        let timestamps = self
            .block_timestamps(located.iter().map(|(_, _, _, block, _)| *block), deadline)
            .await?;

        let mut events = Vec::with_capacity(located.len());
        for (span, tx_hash, log_index, block_number, decoded) in located {
            let Some(fetched) = timestamps.get(&block_number) else {
                timed_out = true;
                failed_spans.insert(span);
                continue;
            };
            let timestamp = match fetched.and_then(|ts| DateTime::<Utc>::from_timestamp(i64::try_from(ts).ok()?, 0)) {
                Some(ts) => ts,
                None => {
                    tracing::warn!(block = block_number, "Skipping transfer in unknown block");
                    skipped += 1;
                    continue;
                }
            };
            events.push((
                span,
                TransferEvent {
                    token: token.clone(),
                    tx_hash,
                    log_index,
                    block_number,
                    timestamp,
                    from: decoded.from,
                    to: decoded.to,
                    value: decoded.value,
                },
            ));
        }

        if failed_spans.len() == spans.len() {
            return Err(match last_error {
                Some(e) if !timed_out => ScanError::ChainUnavailable(e),
                _ => ScanError::TimedOut(self.config.call_timeout.unwrap_or_default()),
            });
        }

        // A span is reported whole or not at all
        let mut events: Vec<TransferEvent> = events
            .into_iter()
            .filter(|(span, _)| !failed_spans.contains(span))
            .map(|(_, event)| event)
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));

        Ok(Collected {
            events,
            failed_spans: failed_spans.into_iter().collect(),
            skipped,
        })
    }

    async fn block_of_transaction(&self, hash: B256) -> Result<Option<u64>, ScanError> {
        let tx = self
            .config
            .retry
            .run("eth_getTransactionByHash", || self.chain.transaction_by_hash(hash))
            .await
            .map_err(ScanError::ChainUnavailable)?;
        Ok(tx.and_then(|tx| tx.block_number))
    }

    /// Timestamp per distinct block, one lookup each. A block missing from
    /// the map was not reached before `deadline`; `None` means the chain
    /// has no such block.
    async fn block_timestamps(
        &self,
        blocks: impl Iterator<Item = u64>,
        deadline: Option<Instant>,
    ) -> Result<HashMap<u64, Option<u64>>, ScanError> {
        let mut distinct: Vec<u64> = blocks.collect();
        distinct.sort_unstable();
        distinct.dedup();

        let mut lookups = pin!(stream::iter(distinct)
            .map(|number| async move {
                let header = self
                    .config
                    .retry
                    .run("eth_getBlockByNumber", || self.chain.block_by_number(number))
                    .await;
                (number, header)
            })
            .buffered(self.config.span_concurrency.max(1)));

        let mut timestamps = HashMap::new();
        while let Some(Some((number, header))) = within(deadline, lookups.next()).await {
            let header = header.map_err(ScanError::ChainUnavailable)?;
            timestamps.insert(number, header.map(|h| h.timestamp));
        }
        Ok(timestamps)
    }
}
