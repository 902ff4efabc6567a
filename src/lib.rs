//! erc20-scout - Multi-source ERC-20 data aggregation library
//!
//! Reconciles spot prices from several exchanges, reconstructs wallet
//! transfer history from on-chain Transfer events and ranks token holders.
//!
//! # Modules
//!
//! - `domain`: Records (TokenRef, PriceQuote, TransferEvent, HolderBalance)
//! - `ports`: Trait abstractions (ExchangeClient, ChainReader) and test doubles
//! - `adapters`: External implementations (Uniswap, Binance, Bybit, EVM RPC, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: PriceAggregator, ChainEventScanner, HolderRanker

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod config;
pub mod application;
