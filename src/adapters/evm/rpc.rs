//! EVM JSON-RPC client
//!
//! Wraps an alloy HTTP provider behind [`ChainReader`]. Retries are left
//! to the caller so each task owns its own policy.

use std::time::Duration;

use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::json_rpc::ErrorPayload;
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log, TransactionInput, TransactionRequest};
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportError, TransportErrorKind};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use reqwest::Client;

use crate::ports::chain::{
    BlockHeader, ChainError, ChainReader, LogEntry, LogFilter, TransactionInfo,
    EXECUTION_REVERTED_CODE, LIMIT_EXCEEDED_CODE,
};

/// Configuration for the [`EvmRpcClient`]
#[derive(Debug, Clone)]
pub struct EvmRpcConfig {
    pub rpc_url: String,
    pub timeout: Duration,
}

impl Default for EvmRpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://cloudflare-eth.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl EvmRpcConfig {
    pub fn with_rpc_url(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ..Default::default()
        }
    }
}

/// Read-only chain client over an alloy provider
#[derive(Clone)]
pub struct EvmRpcClient {
    config: EvmRpcConfig,
    provider: RootProvider,
}

impl EvmRpcClient {
    pub fn new(config: EvmRpcConfig) -> Result<Self, ChainError> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Transport(format!("Invalid RPC URL '{}': {}", config.rpc_url, e)))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let client = RpcClient::new(Http::with_client(http, url), false);
        Ok(Self {
            config,
            provider: RootProvider::new(client),
        })
    }

    pub fn with_rpc_url(rpc_url: impl Into<String>) -> Result<Self, ChainError> {
        Self::new(EvmRpcConfig::with_rpc_url(rpc_url))
    }

    pub fn rpc_url(&self) -> &str {
        &self.config.rpc_url
    }
}

/// Map a provider error onto the port taxonomy
fn classify_error(err: TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => classify_payload(payload),
        RpcError::Transport(TransportErrorKind::HttpError(http)) if http.status == 429 => {
            ChainError::RateLimited
        }
        RpcError::Transport(kind) => ChainError::Transport(kind.to_string()),
        RpcError::NullResp => ChainError::Decode("null response".to_string()),
        RpcError::DeserError { err, .. } => ChainError::Decode(err.to_string()),
        other => ChainError::Transport(other.to_string()),
    }
}

fn classify_payload(payload: ErrorPayload) -> ChainError {
    let message = payload.message.to_string();
    let lowered = message.to_ascii_lowercase();

    if payload.code == EXECUTION_REVERTED_CODE || lowered.contains("execution reverted") {
        let detail = payload
            .data
            .map(|d| d.get().to_string())
            .unwrap_or(message);
        return ChainError::Reverted(detail);
    }
    if payload.code == LIMIT_EXCEEDED_CODE
        || lowered.contains("query returned more than")
        || lowered.contains("response size exceeded")
        || lowered.contains("block range")
    {
        return ChainError::ResultLimit(message);
    }
    if payload.code == 429 || lowered.contains("rate limit") {
        return ChainError::RateLimited;
    }
    ChainError::Rpc {
        code: payload.code,
        message,
    }
}

fn rpc_filter(filter: &LogFilter) -> Filter {
    let mut rpc = Filter::new()
        .address(filter.address)
        .from_block(filter.from_block)
        .to_block(filter.to_block);
    for (position, topic) in filter.topics.iter().take(4).enumerate() {
        if let Some(topic) = topic {
            rpc.topics[position] = (*topic).into();
        }
    }
    rpc
}

fn log_entry(log: Log) -> LogEntry {
    LogEntry {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        removed: log.removed,
    }
}

#[async_trait]
impl ChainReader for EvmRpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(classify_error)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError> {
        tracing::debug!(from = filter.from_block, to = filter.to_block, "eth_getLogs");
        let logs = self
            .provider
            .get_logs(&rpc_filter(filter))
            .await
            .map_err(classify_error)?;
        Ok(logs.into_iter().map(log_entry).collect())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHeader>, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(classify_error)?;
        Ok(block.map(|b| BlockHeader {
            number: b.header.inner.number,
            timestamp: b.header.inner.timestamp,
        }))
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TransactionInfo>, ChainError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(classify_error)?;
        Ok(tx.map(|t| TransactionInfo {
            hash,
            block_number: t.block_number,
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));
        self.provider.call(request).await.map_err(classify_error)
    }
}
