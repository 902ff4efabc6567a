//! Chain access port
//!
//! The subset of EVM JSON-RPC the scanner and ranker need. All calls are
//! read-only.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC error code for a reverted `eth_call`
pub const EXECUTION_REVERTED_CODE: i64 = 3;
/// Error code providers use when `eth_getLogs` matches too many results
pub const LIMIT_EXCEEDED_CODE: i64 = -32005;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by RPC endpoint")]
    RateLimited,

    /// The query matched more results than the endpoint returns at once.
    /// Repeating it cannot succeed; a narrower block range can.
    #[error("Result limit exceeded: {0}")]
    ResultLimit(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::RateLimited)
    }
}

/// `eth_getLogs` filter; `topics[i] == None` matches anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub from_block: u64,
    pub to_block: u64,
    pub topics: Vec<Option<B256>>,
}

impl LogFilter {
    pub fn matches(&self, log: &LogEntry) -> bool {
        if log.address != self.address {
            return false;
        }
        if let Some(block) = log.block_number {
            if block < self.from_block || block > self.to_block {
                return false;
            }
        }
        self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
            None => true,
            Some(topic) => log.topics.get(i) == Some(topic),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub removed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub hash: B256,
    /// `None` while the transaction is pending
    pub block_number: Option<u64>,
}

/// Read-only view of an EVM chain
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `eth_blockNumber`
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// `eth_getLogs`
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError>;

    /// `eth_getBlockByNumber` without transaction bodies
    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHeader>, ChainError>;

    /// `eth_getTransactionByHash`
    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TransactionInfo>, ChainError>;

    /// `eth_call` against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;
}
