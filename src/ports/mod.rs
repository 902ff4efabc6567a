//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement:
//! - Price sources (DEX subgraph, CEX tickers)
//! - Read-only EVM chain access (logs, blocks, `eth_call`)

pub mod chain;
pub mod exchange;
pub mod mocks;

pub use chain::{BlockHeader, ChainError, ChainReader, LogEntry, LogFilter, TransactionInfo};
pub use exchange::{ExchangeClient, ExchangeError};
