//! Binance spot ticker client

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{classify_status, lookup_symbol, parse_decimal};
use crate::domain::{Exchange, PriceQuote, QuoteCurrency, TokenRef};
use crate::ports::exchange::{ExchangeClient, ExchangeError};

/// Binance error code for an unknown symbol
const INVALID_SYMBOL_CODE: i64 = -1121;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    /// Sent as `X-MBX-APIKEY` when present
    pub api_key: Option<String>,
    /// Token address to base asset ticker, e.g. SAND
    pub symbols: HashMap<Address, String>,
    pub timeout: Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            api_key: None,
            symbols: HashMap::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinanceClient {
    config: BinanceConfig,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::SourceUnavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    /// Exchange ticker for `token`, e.g. SANDUSDT
    pub fn ticker(&self, token: &TokenRef, quote: QuoteCurrency) -> Result<String, ExchangeError> {
        let base = lookup_symbol(&self.config.symbols, token, "binance")?;
        Ok(format!("{}{}", base.to_uppercase(), quote.ticker()))
    }

    pub(super) fn quote_from_ok(
        token: &TokenRef,
        quote: QuoteCurrency,
        body: &str,
    ) -> Result<PriceQuote, ExchangeError> {
        let ticker: TickerPrice = serde_json::from_str(body)
            .map_err(|e| ExchangeError::SchemaMismatch(format!("ticker/price body: {}", e)))?;
        let price = parse_decimal(&ticker.price, "price")?;
        PriceQuote::new(token.clone(), Exchange::Binance, price, quote, Utc::now())
            .map_err(|e| ExchangeError::SchemaMismatch(e.to_string()))
    }

    pub(super) fn error_from_body(ticker: &str, status: StatusCode, body: &str) -> ExchangeError {
        match serde_json::from_str::<ApiError>(body) {
            Ok(err) if err.code == INVALID_SYMBOL_CODE => ExchangeError::NotListed(ticker.to_string()),
            Ok(err) => ExchangeError::SourceUnavailable(format!("binance {} ({}): {}", status, err.code, err.msg)),
            Err(_) => ExchangeError::SourceUnavailable(format!("binance {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn fetch_price(&self, token: &TokenRef, quote: QuoteCurrency) -> Result<PriceQuote, ExchangeError> {
        let ticker = self.ticker(token, quote)?;
        let url = format!("{}/api/v3/ticker/price", self.config.base_url);
        tracing::debug!(%ticker, "Querying Binance ticker");

        let mut req = self.http.get(&url).query(&[("symbol", ticker.as_str())]);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("X-MBX-APIKEY", api_key);
        }

        let response = req.send().await?;
        let status = response.status();
        if let Some(err) = classify_status(status, response.headers()) {
            return Err(err);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(Self::error_from_body(&ticker, status, &body));
        }
        Self::quote_from_ok(token, quote, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::exchange::test_server;
    use rust_decimal_macros::dec;

    fn sand() -> TokenRef {
        TokenRef::new(Address::repeat_byte(0x38)).with_symbol("SAND")
    }

    fn client() -> BinanceClient {
        let mut config = BinanceConfig::default();
        config.symbols.insert(sand().address, "sand".to_string());
        BinanceClient::new(config).unwrap()
    }

    #[test]
    fn test_ticker_from_symbol_table() {
        assert_eq!(client().ticker(&sand(), QuoteCurrency::Usdt).unwrap(), "SANDUSDT");
        assert_eq!(client().ticker(&sand(), QuoteCurrency::Eth).unwrap(), "SANDETH");
    }

    #[test]
    fn test_unmapped_token_is_not_listed() {
        let prime = TokenRef::new(Address::repeat_byte(0xb2)).with_symbol("PRIME");
        assert!(matches!(
            client().ticker(&prime, QuoteCurrency::Usdt),
            Err(ExchangeError::NotListed(_))
        ));
    }

    #[test]
    fn test_quote_from_ok_body() {
        let quote = BinanceClient::quote_from_ok(
            &sand(),
            QuoteCurrency::Usdt,
            r#"{"symbol":"SANDUSDT","price":"0.45210000"}"#,
        )
        .unwrap();
        assert_eq!(quote.price(), dec!(0.4521));
        assert_eq!(quote.exchange, Exchange::Binance);
        assert_eq!(quote.source_scale, 8);
    }

    #[test]
    fn test_missing_price_is_schema_mismatch() {
        let err = BinanceClient::quote_from_ok(&sand(), QuoteCurrency::Usdt, r#"{"symbol":"SANDUSDT"}"#).unwrap_err();
        assert!(matches!(err, ExchangeError::SchemaMismatch(_)));
    }

    #[test]
    fn test_invalid_symbol_is_not_listed() {
        let err = BinanceClient::error_from_body(
            "PRIMEUSDT",
            StatusCode::BAD_REQUEST,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#,
        );
        assert_eq!(err, ExchangeError::NotListed("PRIMEUSDT".into()));
    }

    #[test]
    fn test_other_api_error_is_source_unavailable() {
        let err = BinanceClient::error_from_body("SANDUSDT", StatusCode::FORBIDDEN, "WAF blocked");
        assert!(matches!(err, ExchangeError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_price_over_http_rate_limited() {
        let base_url = test_server::serve(
            "429 Too Many Requests",
            &[("retry-after", "3")],
            r#"{"code":-1003,"msg":"Too many requests; current limit is 1200 request weight per 1 MINUTE."}"#,
        )
        .await;
        let mut config = BinanceConfig { base_url, ..BinanceConfig::default() };
        config.symbols.insert(sand().address, "SAND".to_string());
        let client = BinanceClient::new(config).unwrap();

        let err = client.fetch_price(&sand(), QuoteCurrency::Usdt).await.unwrap_err();

        assert_eq!(err, ExchangeError::RateLimited { retry_after: Some(Duration::from_secs(3)) });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_price_over_http_ok() {
        let base_url = test_server::serve("200 OK", &[], r#"{"symbol":"SANDUSDT","price":"0.45120000"}"#).await;
        let mut config = BinanceConfig { base_url, ..BinanceConfig::default() };
        config.symbols.insert(sand().address, "SAND".to_string());
        let client = BinanceClient::new(config).unwrap();

        let quote = client.fetch_price(&sand(), QuoteCurrency::Usdt).await.unwrap();

        assert_eq!(quote.price(), dec!(0.4512));
        assert_eq!(quote.exchange, Exchange::Binance);
    }
}
