//! Token references and raw-unit normalization.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Decimals assumed when configuration does not say otherwise
pub const DEFAULT_DECIMALS: u8 = 18;

/// Largest scale `rust_decimal` can represent
const MAX_DECIMAL_SCALE: u8 = 28;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("raw amount {0} does not fit a decimal")]
    Overflow(U256),
    #[error("token decimals {0} exceed supported scale")]
    UnsupportedScale(u8),
}

/// An ERC-20 token as named in configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: u8,
}

impl TokenRef {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            symbol: None,
            decimals: DEFAULT_DECIMALS,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// EIP-55 checksummed address
    pub fn checksummed(&self) -> String {
        self.address.to_checksum(None)
    }

    /// Symbol if known, checksummed address otherwise
    pub fn label(&self) -> String {
        self.symbol.clone().unwrap_or_else(|| self.checksummed())
    }

    /// Convert a raw on-chain amount into token units
    pub fn to_units(&self, raw: U256) -> Result<Decimal, AmountError> {
        raw_to_decimal(raw, self.decimals)
    }
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{} ({})", symbol, self.checksummed()),
            None => write!(f, "{}", self.checksummed()),
        }
    }
}

/// Scale a raw integer amount down by `decimals`.
pub fn raw_to_decimal(raw: U256, decimals: u8) -> Result<Decimal, AmountError> {
    if decimals > MAX_DECIMAL_SCALE {
        return Err(AmountError::UnsupportedScale(decimals));
    }
    let mantissa: i128 = u128::try_from(raw)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .ok_or(AmountError::Overflow(raw))?;
    Decimal::try_from_i128_with_scale(mantissa, u32::from(decimals))
        .map(|d| d.normalize())
        .map_err(|_| AmountError::Overflow(raw))
}
