//! Exchange wire contract tests
//!
//! Recorded response bodies under `fixtures/exchanges/` run through each
//! client's body parser. A failure here means a source changed its schema.

use reqwest::StatusCode;
use rust_decimal_macros::dec;
use serde_json::Value;

use super::{BinanceClient, BybitClient, UniswapClient};
use crate::domain::{Exchange, QuoteCurrency, TokenRef};
use crate::ports::exchange::ExchangeError;

const SAND: alloy_primitives::Address = alloy_primitives::address!("3845badAde8e6dFF049820680d1F14bD3903a5d0");

fn load_fixture(name: &str) -> String {
    let path = format!("{}/fixtures/exchanges/{}.json", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("CONTRACT VIOLATION: Failed to load fixture '{}': {}", path, e))
}

fn load_json(name: &str) -> Value {
    serde_json::from_str(&load_fixture(name))
        .unwrap_or_else(|e| panic!("CONTRACT VIOLATION: Fixture '{}' is not JSON: {}", name, e))
}

fn sand() -> TokenRef {
    TokenRef::new(SAND).with_symbol("SAND")
}

mod uniswap_contract {
    use super::*;

    #[test]
    fn test_pair_fields_present() {
        let body = load_json("uniswap_pair");
        let pair = &body["data"]["pair"];
        for field in ["token0Price", "token1Price"] {
            assert!(
                pair.get(field).and_then(Value::as_str).is_some(),
                "CONTRACT VIOLATION: 'data.pair.{}' missing or not a string",
                field
            );
        }
    }

    #[test]
    fn test_pair_parses_to_eth_quote() {
        let client = UniswapClient::new().unwrap();
        let quote = client
            .quote_from_body(&sand(), QuoteCurrency::Eth, &load_json("uniswap_pair"))
            .unwrap();

        // SAND sorts below WETH, so it is token0 and priced by token1Price
        assert_eq!(quote.price(), dec!(0.000437175211372486));
        assert_eq!(quote.exchange, Exchange::Uniswap);
        assert_eq!(quote.source_scale, 18);
    }

    #[test]
    fn test_null_pair_is_source_unavailable() {
        let client = UniswapClient::new().unwrap();
        let err = client
            .quote_from_body(&sand(), QuoteCurrency::Eth, &load_json("uniswap_pair_null"))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::SourceUnavailable(_)));
    }
}

mod binance_contract {
    use super::*;

    #[test]
    fn test_ticker_parses() {
        let quote = BinanceClient::quote_from_ok(&sand(), QuoteCurrency::Usdt, &load_fixture("binance_ticker")).unwrap();
        assert_eq!(quote.price(), dec!(0.4521));
        assert_eq!(quote.quote_currency, QuoteCurrency::Usdt);
    }

    #[test]
    fn test_invalid_symbol_body() {
        let err = BinanceClient::error_from_body(
            "SANDUSDT",
            StatusCode::BAD_REQUEST,
            &load_fixture("binance_invalid_symbol"),
        );
        assert_eq!(err, ExchangeError::NotListed("SANDUSDT".into()));
    }
}

mod bybit_contract {
    use super::*;

    #[test]
    fn test_result_entry_has_last_price() {
        let body = load_json("bybit_tickers");
        assert_eq!(body["ret_code"], 0);
        assert!(
            body["result"][0]["last_price"].is_string(),
            "CONTRACT VIOLATION: 'result[0].last_price' missing or not a string"
        );
    }

    #[test]
    fn test_tickers_parse() {
        let quote = BybitClient::quote_from_body(
            &sand(),
            QuoteCurrency::Usdt,
            "SANDUSDT",
            &load_fixture("bybit_tickers"),
        )
        .unwrap();
        assert_eq!(quote.price(), dec!(0.452));
        assert_eq!(quote.source_scale, 4);
    }

    #[test]
    fn test_empty_result_is_not_listed() {
        let err = BybitClient::quote_from_body(
            &sand(),
            QuoteCurrency::Usdt,
            "SANDUSDT",
            &load_fixture("bybit_empty"),
        )
        .unwrap_err();
        assert!(matches!(err, ExchangeError::NotListed(_)));
    }
}
