//! EVM Adapter
//!
//! JSON-RPC transport implementing [`ChainReader`](crate::ports::chain::ChainReader)
//! and the ABI helpers for the ERC-20 calls and events the scanner reads.

pub mod abi;
mod rpc;

pub use rpc::{EvmRpcClient, EvmRpcConfig};
