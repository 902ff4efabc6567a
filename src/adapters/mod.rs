//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Exchange: Uniswap subgraph, Binance and Bybit REST clients
//! - EVM: JSON-RPC chain reader and ERC-20 ABI helpers
//! - CLI: Command-line interface handlers

pub mod exchange;
pub mod evm;
pub mod cli;

pub use exchange::{BinanceClient, BybitClient, UniswapClient};
pub use evm::EvmRpcClient;
pub use cli::CliApp;
