//! ERC-20 contract interface
//!
//! Call data, return values and the `Transfer` event are generated by
//! `sol!`. The helpers here adapt them to the chain port types.

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent, SolInterface, SolValue};
use thiserror::Error;

use crate::ports::chain::LogEntry;

sol! {
    /// ERC-20 reads plus the supply-indexed holder enumeration some
    /// token contracts expose
    #[sol(extra_derives(Debug))]
    interface IErc20Holders {
        struct HolderEntry {
            address holder;
            uint256 balance;
        }

        event Transfer(address indexed from, address indexed to, uint256 value);

        function totalSupply() external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
        function topHolders(uint256 offset, uint256 count) external view returns (HolderEntry[] memory);
    }
}

pub use IErc20Holders::{balanceOfCall, topHoldersCall, totalSupplyCall, IErc20HoldersCalls, Transfer};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("malformed ABI data: {0}")]
    Decode(String),
    #[error("not a Transfer event: {0}")]
    NotTransfer(String),
    #[error("invalid address word")]
    AddressWord,
}

impl From<alloy_sol_types::Error> for AbiError {
    fn from(e: alloy_sol_types::Error) -> Self {
        AbiError::Decode(e.to_string())
    }
}

/// topic0 of every ERC-20 (and ERC-721) `Transfer` log
pub fn transfer_topic() -> B256 {
    Transfer::SIGNATURE_HASH
}

/// Left-padded address word used in indexed topics
pub fn address_topic(address: Address) -> B256 {
    address.into_word()
}

fn topic_to_address(topic: &B256) -> Result<Address, AbiError> {
    if topic[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::AddressWord);
    }
    Ok(Address::from_word(*topic))
}

pub fn encode_total_supply() -> Bytes {
    totalSupplyCall {}.abi_encode().into()
}

pub fn encode_balance_of(owner: Address) -> Bytes {
    balanceOfCall { owner }.abi_encode().into()
}

pub fn encode_top_holders(offset: u64, count: u64) -> Bytes {
    topHoldersCall {
        offset: U256::from(offset),
        count: U256::from(count),
    }
    .abi_encode()
    .into()
}

/// Decode a single `uint256` return value
pub fn decode_uint(data: &[u8]) -> Result<U256, AbiError> {
    Ok(U256::abi_decode(data)?)
}

/// Decode the `(address,uint256)[]` returned by `topHolders`
pub fn decode_holder_chunk(data: &[u8]) -> Result<Vec<(Address, U256)>, AbiError> {
    Ok(<Vec<(Address, U256)>>::abi_decode(data)?)
}

/// Encode a holder chunk the way a contract would return it
pub fn encode_holder_chunk(entries: &[(Address, U256)]) -> Bytes {
    entries.to_vec().abi_encode().into()
}

pub fn encode_uint(value: U256) -> Bytes {
    value.abi_encode().into()
}

/// Decode call data produced by the `encode_*` helpers; used by in-memory chains
pub fn decode_call(data: &[u8]) -> Option<IErc20HoldersCalls> {
    IErc20HoldersCalls::abi_decode(data).ok()
}

/// Fields of a decoded ERC-20 `Transfer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Decode a `Transfer(address indexed, address indexed, uint256)` log.
/// ERC-721 transfers share topic0 but index the token id and carry no
/// data, so they are rejected.
pub fn decode_transfer(log: &LogEntry) -> Result<DecodedTransfer, AbiError> {
    if log.topics.first() != Some(&transfer_topic()) {
        return Err(AbiError::NotTransfer("topic0 mismatch".into()));
    }
    if log.topics.len() != 3 {
        return Err(AbiError::NotTransfer(format!("{} topics", log.topics.len())));
    }

    if log.data.len() != 32 {
        return Err(AbiError::Decode(format!("{} data bytes", log.data.len())));
    }

    Ok(DecodedTransfer {
        from: topic_to_address(&log.topics[1])?,
        to: topic_to_address(&log.topics[2])?,
        value: U256::abi_decode(&log.data)?,
    })
}

/// Build a well-formed Transfer log
pub fn encode_transfer_log(
    token: Address,
    from: Address,
    to: Address,
    value: U256,
    block_number: u64,
    tx_hash: B256,
    log_index: u64,
) -> LogEntry {
    LogEntry {
        address: token,
        topics: vec![transfer_topic(), address_topic(from), address_topic(to)],
        data: encode_uint(value),
        block_number: Some(block_number),
        transaction_hash: Some(tx_hash),
        log_index: Some(log_index),
        removed: false,
    }
}
