//! Bybit public tickers client

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use super::{classify_status, lookup_symbol, parse_decimal};
use crate::domain::{Exchange, PriceQuote, QuoteCurrency, TokenRef};
use crate::ports::exchange::{ExchangeClient, ExchangeError};

/// `ret_code` values Bybit uses for an unknown symbol
const INVALID_SYMBOL_CODES: [i64; 2] = [10001, 10029];
/// `ret_code` values Bybit uses for request throttling
const RATE_LIMIT_CODES: [i64; 2] = [10006, 10018];

#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Token address to base asset ticker, e.g. MANA
    pub symbols: HashMap<Address, String>,
    pub timeout: Duration,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bybit.com".to_string(),
            api_key: None,
            symbols: HashMap::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BybitClient {
    config: BybitConfig,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(default)]
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<Vec<Ticker>>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    last_price: Option<String>,
}

impl BybitClient {
    pub fn new(config: BybitConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::SourceUnavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn ticker(&self, token: &TokenRef, quote: QuoteCurrency) -> Result<String, ExchangeError> {
        let base = lookup_symbol(&self.config.symbols, token, "bybit")?;
        Ok(format!("{}{}", base.to_uppercase(), quote.ticker()))
    }

    pub(super) fn quote_from_body(
        token: &TokenRef,
        quote: QuoteCurrency,
        ticker: &str,
        body: &str,
    ) -> Result<PriceQuote, ExchangeError> {
        let response: TickersResponse = serde_json::from_str(body)
            .map_err(|e| ExchangeError::SchemaMismatch(format!("tickers body: {}", e)))?;

        if INVALID_SYMBOL_CODES.contains(&response.ret_code) {
            return Err(ExchangeError::NotListed(ticker.to_string()));
        }
        if RATE_LIMIT_CODES.contains(&response.ret_code) {
            return Err(ExchangeError::RateLimited { retry_after: None });
        }
        if response.ret_code != 0 {
            return Err(ExchangeError::SourceUnavailable(format!(
                "bybit ret_code {}: {}",
                response.ret_code, response.ret_msg
            )));
        }

        let first = response
            .result
            .and_then(|tickers| tickers.into_iter().next())
            .ok_or_else(|| ExchangeError::NotListed(ticker.to_string()))?;
        let raw = first
            .last_price
            .ok_or_else(|| ExchangeError::SchemaMismatch("ticker has no last_price".into()))?;
        let price = parse_decimal(&raw, "last_price")?;

        PriceQuote::new(token.clone(), Exchange::Bybit, price, quote, Utc::now())
            .map_err(|e| ExchangeError::SchemaMismatch(e.to_string()))
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn exchange(&self) -> Exchange {
        Exchange::Bybit
    }

    async fn fetch_price(&self, token: &TokenRef, quote: QuoteCurrency) -> Result<PriceQuote, ExchangeError> {
        let ticker = self.ticker(token, quote)?;
        let url = format!("{}/v2/public/tickers", self.config.base_url);
        tracing::debug!(%ticker, "Querying Bybit tickers");

        let mut req = self.http
            .get(&url)
            .query(&[("symbol", ticker.as_str())])
            .header("Referer", "https://www.bybit.com/");
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("X-BAPI-API-KEY", api_key);
        }

        let response = req.send().await?;
        let status = response.status();
        if let Some(err) = classify_status(status, response.headers()) {
            return Err(err);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::SourceUnavailable(format!("bybit {}: {}", status, body)));
        }
        Self::quote_from_body(token, quote, &ticker, &body)
    }
}
