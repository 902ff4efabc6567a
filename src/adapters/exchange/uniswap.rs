//! Uniswap V2 subgraph client
//!
//! Pairs are looked up by their CREATE2 address, so the id is derived from
//! the two tokens alone and needs no discovery query.

use std::time::Duration;

use alloy_primitives::{address, b256, keccak256, Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};

use super::{classify_status, parse_decimal};
use crate::domain::{Exchange, PriceQuote, QuoteCurrency, TokenRef};
use crate::ports::exchange::{ExchangeClient, ExchangeError};

pub const UNISWAP_V2_SUBGRAPH: &str = "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v2";
pub const UNISWAP_V2_FACTORY: Address = address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f");
pub const UNISWAP_V2_PAIR_INIT_CODE_HASH: B256 =
    b256!("96e8ac4277198ff8b6f785478aa9a39f403cb768dd02cbee326c3e7da348845f");
pub const WETH: Address = address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
pub const USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

#[derive(Debug, Clone)]
pub struct UniswapConfig {
    pub endpoint: String,
    pub factory: Address,
    pub init_code_hash: B256,
    /// Asset paired with the token for ETH quotes
    pub wrapped_native: Address,
    /// Asset paired with the token for USDT quotes
    pub usdt: Address,
    pub timeout: Duration,
}

impl Default for UniswapConfig {
    fn default() -> Self {
        Self {
            endpoint: UNISWAP_V2_SUBGRAPH.to_string(),
            factory: UNISWAP_V2_FACTORY,
            init_code_hash: UNISWAP_V2_PAIR_INIT_CODE_HASH,
            wrapped_native: WETH,
            usdt: USDT,
            timeout: Duration::from_secs(10),
        }
    }
}

impl UniswapConfig {
    fn quote_asset(&self, quote: QuoteCurrency) -> Address {
        match quote {
            QuoteCurrency::Eth => self.wrapped_native,
            QuoteCurrency::Usdt => self.usdt,
        }
    }
}

/// Uniswap V2 pair address for two tokens under `factory`
pub fn pair_address(factory: Address, init_code_hash: B256, a: Address, b: Address) -> Address {
    let (token0, token1) = if a < b { (a, b) } else { (b, a) };
    let mut packed = [0u8; 40];
    packed[..20].copy_from_slice(token0.as_slice());
    packed[20..].copy_from_slice(token1.as_slice());
    factory.create2(keccak256(packed), init_code_hash)
}

#[derive(Debug, Clone)]
pub struct UniswapClient {
    config: UniswapConfig,
    http: Client,
}

impl UniswapClient {
    pub fn new() -> Result<Self, ExchangeError> {
        Self::with_config(UniswapConfig::default())
    }

    pub fn with_config(config: UniswapConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::SourceUnavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    /// Subgraph id of the token's pair with the quote asset
    pub fn pair_id(&self, token: &TokenRef, quote: QuoteCurrency) -> String {
        let pair = pair_address(
            self.config.factory,
            self.config.init_code_hash,
            token.address,
            self.config.quote_asset(quote),
        );
        format!("{:#x}", pair)
    }

    fn query(pair_id: &str) -> Value {
        json!({
            "query": format!("{{ pair(id: \"{}\") {{ token0Price token1Price }} }}", pair_id),
        })
    }

    /// Turn a GraphQL response body into a quote
    pub(super) fn quote_from_body(
        &self,
        token: &TokenRef,
        quote: QuoteCurrency,
        body: &Value,
    ) -> Result<PriceQuote, ExchangeError> {
        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(ExchangeError::SourceUnavailable(format!("subgraph errors: {}", errors)));
        }

        let data = body
            .get("data")
            .ok_or_else(|| ExchangeError::SchemaMismatch("response has no 'data'".into()))?;
        let pair = match data.get("pair") {
            None => return Err(ExchangeError::SchemaMismatch("response has no 'data.pair'".into())),
            Some(Value::Null) => {
                return Err(ExchangeError::SourceUnavailable(format!(
                    "no {}/{} pair",
                    token.label(),
                    quote
                )))
            }
            Some(pair) => pair,
        };

        // token0Price is token0 per token1, so the token's own price sits in
        // the other side's field.
        let quote_asset = self.config.quote_asset(quote);
        let field = if token.address < quote_asset { "token1Price" } else { "token0Price" };
        let raw = pair
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::SchemaMismatch(format!("pair has no string '{}'", field)))?;
        let price = parse_decimal(raw, field)?;

        PriceQuote::new(token.clone(), Exchange::Uniswap, price, quote, Utc::now())
            .map_err(|e| ExchangeError::SourceUnavailable(e.to_string()))
    }
}

#[async_trait]
impl ExchangeClient for UniswapClient {
    fn exchange(&self) -> Exchange {
        Exchange::Uniswap
    }

    async fn fetch_price(&self, token: &TokenRef, quote: QuoteCurrency) -> Result<PriceQuote, ExchangeError> {
        let pair_id = self.pair_id(token, quote);
        tracing::debug!(token = %token.label(), pair = %pair_id, "Querying Uniswap subgraph");

        let response = self.http
            .post(&self.config.endpoint)
            .json(&Self::query(&pair_id))
            .send()
            .await?;

        if let Some(err) = classify_status(response.status(), response.headers()) {
            return Err(err);
        }
        if !response.status().is_success() {
            return Err(ExchangeError::SourceUnavailable(format!("subgraph returned {}", response.status())));
        }

        let body: Value = response.json().await?;
        self.quote_from_body(token, quote, &body)
    }
}
