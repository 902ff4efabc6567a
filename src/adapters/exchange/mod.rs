//! Exchange Adapters
//!
//! HTTP clients implementing [`ExchangeClient`](crate::ports::exchange::ExchangeClient):
//! - `UniswapClient`: Uniswap V2 subgraph (GraphQL), quoted against WETH
//! - `BinanceClient`: Binance spot `ticker/price` REST endpoint
//! - `BybitClient`: Bybit `v2/public/tickers` REST endpoint
//!
//! All prices are parsed from the source's decimal string straight into
//! `Decimal`; nothing goes through `f64`.

mod uniswap;
mod binance;
mod bybit;

#[cfg(test)]
mod contract_tests;
#[cfg(test)]
mod test_server;

pub use uniswap::{UniswapClient, UniswapConfig, pair_address, UNISWAP_V2_FACTORY, WETH, USDT};
pub use binance::{BinanceClient, BinanceConfig};
pub use bybit::{BybitClient, BybitConfig};

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use rust_decimal::Decimal;

use crate::domain::TokenRef;
use crate::ports::exchange::ExchangeError;

/// Map an unsuccessful HTTP status to an error, `None` on success
fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<ExchangeError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
        return Some(ExchangeError::RateLimited {
            retry_after: retry_after(headers),
        });
    }
    if status.is_server_error() {
        return Some(ExchangeError::Transport(format!("Server error: {}", status)));
    }
    None
}

/// `Retry-After` in whole seconds
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|e| ExchangeError::SchemaMismatch(format!("{} is not a decimal ({}): {}", field, raw, e)))
}

/// Base asset ticker for `token` from a declared symbol table
fn lookup_symbol<'a>(
    symbols: &'a HashMap<Address, String>,
    token: &TokenRef,
    exchange: &str,
) -> Result<&'a str, ExchangeError> {
    symbols
        .get(&token.address)
        .map(String::as_str)
        .ok_or_else(|| ExchangeError::NotListed(format!("{} has no {} symbol", token.label(), exchange)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rust_decimal_macros::dec;

    #[test]
    fn test_classify_status() {
        let headers = HeaderMap::new();
        assert!(classify_status(StatusCode::OK, &headers).is_none());
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers),
            Some(ExchangeError::RateLimited { retry_after: None })
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &headers),
            Some(ExchangeError::Transport(_))
        ));
        assert!(classify_status(StatusCode::BAD_REQUEST, &headers).is_none());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers),
            Some(ExchangeError::RateLimited { retry_after: Some(Duration::from_secs(7)) })
        );
    }

    #[test]
    fn test_parse_decimal_keeps_precision() {
        assert_eq!(parse_decimal("0.00000001", "price").unwrap(), dec!(0.00000001));
        assert_eq!(parse_decimal("1.5e-9", "price").unwrap(), dec!(0.0000000015));
        assert!(matches!(parse_decimal("abc", "price"), Err(ExchangeError::SchemaMismatch(_))));
    }
}
