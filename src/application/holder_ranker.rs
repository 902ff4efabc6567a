//! Holder Ranker
//!
//! Enumerates a token's balances through chunked `topHolders(offset, count)`
//! calls and folds them into a deterministic top-N ranking.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::Instant;

use super::retry::{within, RetryPolicy};
use crate::adapters::evm::abi;
use crate::domain::{rank_holders, HolderBalance, HolderRanking, TokenRef};
use crate::ports::chain::{ChainError, ChainReader};

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Token does not support holder enumeration: {0}")]
    UnsupportedToken(String),

    #[error("Chain unavailable: {0}")]
    ChainUnavailable(ChainError),

    #[error("No holders read within {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct RankerConfig {
    /// Entries requested per `topHolders` call
    pub chunk_size: u64,
    /// Chunks in flight at once
    pub chunk_concurrency: usize,
    /// Hard stop on the number of chunks read
    pub max_chunks: u64,
    pub retry: RetryPolicy,
    /// Deadline for a whole call; chunks unfinished by then are reported
    /// as failed. `None` waits for every chunk.
    pub call_timeout: Option<Duration>,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            chunk_concurrency: 4,
            max_chunks: 1_000,
            retry: RetryPolicy::default(),
            call_timeout: Some(Duration::from_secs(60)),
        }
    }
}

pub struct HolderRanker<C: ChainReader + ?Sized> {
    chain: Arc<C>,
    config: RankerConfig,
}

impl<C: ChainReader + ?Sized> HolderRanker<C> {
    pub fn new(chain: Arc<C>, config: RankerConfig) -> Self {
        Self { chain, config }
    }

    /// The `n` largest holders of `token`
    pub async fn top_holders(&self, token: &TokenRef, n: usize) -> Result<HolderRanking, RankingError> {
        let deadline = self.deadline();
        let total_supply = within(deadline, self.total_supply(token))
            .await
            .ok_or_else(|| self.timed_out())??;
        if total_supply.is_zero() {
            tracing::info!(token = %token.label(), "Total supply is zero");
            return Ok(HolderRanking::empty(token.clone(), total_supply));
        }

        let chunk_size = self.config.chunk_size.max(1);
        let first = within(deadline, self.fetch_chunk(token.address, 0))
            .await
            .ok_or_else(|| self.timed_out())?;
        let first = match first {
            Ok(entries) if entries.is_empty() => {
                return Err(RankingError::UnsupportedToken(format!(
                    "{} returned no holders for a non-zero supply",
                    token.label()
                )))
            }
            Ok(entries) => entries,
            Err(ChunkError::Chain(e)) if e.is_retryable() => return Err(RankingError::ChainUnavailable(e)),
            Err(e) => return Err(RankingError::UnsupportedToken(format!("{}: {}", token.label(), e))),
        };

        let mut done = (first.len() as u64) < chunk_size;
        let mut entries = first;
        let mut failed_chunks = Vec::new();
        let mut next_chunk = 1u64;
        let mut timed_out = false;

        while !done && !timed_out && next_chunk < self.config.max_chunks {
            let batch_end = next_chunk
                .saturating_add(self.config.chunk_concurrency.max(1) as u64)
                .min(self.config.max_chunks);
            let offsets: Vec<u64> = (next_chunk..batch_end)
                .map(|i| i.saturating_mul(chunk_size))
                .take_while(|offset| U256::from(*offset) < total_supply)
                .collect();
            if offsets.is_empty() {
                break;
            }
            next_chunk = batch_end;

            let results = join_all(
                offsets
                    .iter()
                    .map(|&offset| within(deadline, self.fetch_chunk(token.address, offset))),
            )
            .await;
            for (offset, result) in offsets.into_iter().zip(results) {
                match result {
                    Some(Ok(chunk)) => {
                        if (chunk.len() as u64) < chunk_size {
                            done = true;
                        }
                        entries.extend(chunk);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(token = %token.label(), offset, error = %e, "Holder chunk failed");
                        failed_chunks.push(offset);
                    }
                    None => {
                        timed_out = true;
                        failed_chunks.push(offset);
                    }
                }
            }
        }

        if timed_out {
            tracing::warn!(token = %token.label(), unfinished = ?failed_chunks, "Call deadline reached while reading holders");
        }

        if !done && next_chunk >= self.config.max_chunks {
            tracing::warn!(token = %token.label(), max_chunks = self.config.max_chunks, "Stopped at chunk limit");
        }

        Ok(HolderRanking {
            token: token.clone(),
            total_supply,
            holders: rank_holders(entries, n),
            failed_chunks,
        })
    }

    /// `balanceOf` for each wallet, in input order
    pub async fn balances_of(
        &self,
        token: &TokenRef,
        wallets: &[Address],
    ) -> Result<Vec<HolderBalance>, RankingError> {
        let reads = stream::iter(wallets.iter().copied())
            .map(|wallet| async move {
                let raw = self.call(token.address, abi::encode_balance_of(wallet), "balanceOf").await?;
                let balance = abi::decode_uint(&raw)
                    .map_err(|e| RankingError::UnsupportedToken(format!("balanceOf: {}", e)))?;
                Ok(HolderBalance { address: wallet, balance })
            })
            .buffered(self.config.chunk_concurrency.max(1))
            .collect::<Vec<Result<HolderBalance, RankingError>>>();
        let results = within(self.deadline(), reads).await.ok_or_else(|| self.timed_out())?;
        results.into_iter().collect()
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.call_timeout.map(|t| Instant::now() + t)
    }

    fn timed_out(&self) -> RankingError {
        RankingError::TimedOut(self.config.call_timeout.unwrap_or_default())
    }

    async fn total_supply(&self, token: &TokenRef) -> Result<U256, RankingError> {
        let raw = self
            .call(token.address, abi::encode_total_supply(), "totalSupply")
            .await
            .map_err(|e| match e {
                RankingError::ChainUnavailable(ChainError::Reverted(msg)) => {
                    RankingError::UnsupportedToken(format!("totalSupply reverted: {}", msg))
                }
                other => other,
            })?;
        abi::decode_uint(&raw).map_err(|e| RankingError::UnsupportedToken(format!("totalSupply: {}", e)))
    }

    async fn call(&self, to: Address, data: Bytes, operation: &str) -> Result<Bytes, RankingError> {
        self.config
            .retry
            .run(operation, || self.chain.call(to, data.clone()))
            .await
            .map_err(RankingError::ChainUnavailable)
    }

    async fn fetch_chunk(&self, token: Address, offset: u64) -> Result<Vec<(Address, U256)>, ChunkError> {
        let data = abi::encode_top_holders(offset, self.config.chunk_size.max(1));
        let raw = self
            .config
            .retry
            .run("topHolders", || self.chain.call(token, data.clone()))
            .await
            .map_err(ChunkError::Chain)?;
        abi::decode_holder_chunk(&raw).map_err(|e| ChunkError::Decode(e.to_string()))
    }
}

#[derive(Debug, Error)]
enum ChunkError {
    #[error("{0}")]
    Chain(ChainError),

    #[error("undecodable chunk: {0}")]
    Decode(String),
}
