//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.

use alloy_primitives::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::evm::EvmRpcConfig;
use crate::adapters::exchange::{BinanceConfig, BybitConfig, UniswapConfig};
use crate::application::{AggregatorConfig, RankerConfig, RetryPolicy, ScannerConfig};
use crate::domain::{Exchange, QuoteCurrency, TokenRef, DEFAULT_DECIMALS};

/// Largest decimals value a `Decimal` amount can represent
const MAX_DECIMALS: u8 = 28;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainSection,
    #[serde(default)]
    pub wallet: Option<WalletSection>,
    pub tokens: Vec<TokenEntry>,
    #[serde(default)]
    pub exchanges: ExchangesSection,
    #[serde(default)]
    pub aggregator: AggregatorSection,
    #[serde(default)]
    pub holders: HoldersSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Chain RPC configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    pub timeout_secs: u64,
    /// Average block interval, used to turn time windows into block ranges
    pub avg_block_time_secs: u64,
    /// Largest block range per `eth_getLogs`
    pub max_block_span: u64,
    pub span_concurrency: usize,
    /// Default lookback for `transfers --recent`
    pub lookback_blocks: u64,
    /// Deadline for a whole scan; 0 disables it
    pub call_timeout_secs: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            rpc_url: EvmRpcConfig::default().rpc_url,
            timeout_secs: 30,
            avg_block_time_secs: 12,
            max_block_span: 10_000,
            span_concurrency: 4,
            lookback_blocks: 50_000,
            call_timeout_secs: 120,
        }
    }
}

impl ChainSection {
    /// Get RPC URL with environment variable override
    /// Checks ETH_RPC_URL env var first, falls back to config value
    pub fn get_rpc_url(&self) -> String {
        std::env::var("ETH_RPC_URL").unwrap_or_else(|_| self.rpc_url.clone())
    }
}

/// Wallet whose history and holdings are reported
#[derive(Debug, Clone, Deserialize)]
pub struct WalletSection {
    pub address: Address,
}

/// One `[[tokens]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub address: Address,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

impl From<&TokenEntry> for TokenRef {
    fn from(entry: &TokenEntry) -> Self {
        let token = TokenRef::new(entry.address).with_decimals(entry.decimals);
        match entry.symbol {
            Some(ref symbol) => token.with_symbol(symbol.clone()),
            None => token,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExchangesSection {
    pub uniswap: UniswapSection,
    pub binance: CexSection,
    pub bybit: CexSection,
}

/// Uniswap subgraph section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniswapSection {
    pub enabled: bool,
    pub endpoint: String,
    pub quote: QuoteCurrency,
    pub timeout_secs: u64,
}

impl Default for UniswapSection {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: UniswapConfig::default().endpoint,
            quote: QuoteCurrency::Eth,
            timeout_secs: 10,
        }
    }
}

/// Centralized exchange section, shared by Binance and Bybit
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CexSection {
    pub enabled: bool,
    /// Overrides the exchange's public API host
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub quote: QuoteCurrency,
    pub timeout_secs: u64,
    /// Token address (hex) to base asset ticker
    pub symbols: HashMap<String, String>,
}

impl Default for CexSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key: None,
            quote: QuoteCurrency::Usdt,
            timeout_secs: 10,
            symbols: HashMap::new(),
        }
    }
}

impl CexSection {
    /// Get API key with environment variable fallback
    /// Checks `env_var` if the config value is empty/None
    pub fn get_api_key(&self, env_var: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var(env_var).ok().filter(|key| !key.is_empty())
    }

    /// Symbol table keyed by parsed address; invalid keys are dropped
    pub fn symbol_table(&self) -> HashMap<Address, String> {
        self.symbols
            .iter()
            .filter_map(|(address, symbol)| Address::from_str(address).ok().map(|a| (a, symbol.clone())))
            .collect()
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        for key in self.symbols.keys() {
            if Address::from_str(key).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "exchanges.{}.symbols key '{}' is not an address",
                    name, key
                )));
            }
        }
        Ok(())
    }
}

/// Price aggregation section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorSection {
    /// Attempts per exchange, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Whole-call deadline for one aggregation; 0 disables it
    pub call_timeout_secs: u64,
    /// Delay between historical samples
    pub sample_delay_ms: u64,
    pub history_days: u32,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            call_timeout_secs: 30,
            sample_delay_ms: 1_000,
            history_days: 7,
        }
    }
}

/// Holder enumeration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HoldersSection {
    pub chunk_size: u64,
    pub chunk_concurrency: usize,
    pub max_chunks: u64,
    pub top_n: usize,
    /// Deadline for a whole ranking; 0 disables it
    pub call_timeout_secs: u64,
}

impl Default for HoldersSection {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            chunk_concurrency: 4,
            max_chunks: 1_000,
            top_n: 10,
            call_timeout_secs: 60,
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_url.is_empty() {
            return Err(ConfigError::ValidationError("chain.rpc_url cannot be empty".to_string()));
        }

        if self.chain.max_block_span == 0 {
            return Err(ConfigError::ValidationError("chain.max_block_span must be > 0".to_string()));
        }

        if self.chain.avg_block_time_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chain.avg_block_time_secs must be > 0".to_string(),
            ));
        }

        if self.tokens.is_empty() {
            return Err(ConfigError::ValidationError("at least one [[tokens]] entry is required".to_string()));
        }

        for (i, token) in self.tokens.iter().enumerate() {
            if token.decimals > MAX_DECIMALS {
                return Err(ConfigError::ValidationError(format!(
                    "tokens[{}].decimals must be <= {}, got {}",
                    i, MAX_DECIMALS, token.decimals
                )));
            }
            if self.tokens[..i].iter().any(|t| t.address == token.address) {
                return Err(ConfigError::ValidationError(format!(
                    "token {} is listed twice",
                    token.address
                )));
            }
        }

        self.exchanges.binance.validate("binance")?;
        self.exchanges.bybit.validate("bybit")?;

        if self.enabled_exchanges().is_empty() {
            return Err(ConfigError::ValidationError("no exchange is enabled".to_string()));
        }

        if self.aggregator.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "aggregator.max_attempts must be >= 1".to_string(),
            ));
        }

        if self.holders.chunk_size == 0 {
            return Err(ConfigError::ValidationError("holders.chunk_size must be > 0".to_string()));
        }

        if self.holders.max_chunks == 0 {
            return Err(ConfigError::ValidationError("holders.max_chunks must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn enabled_exchanges(&self) -> Vec<Exchange> {
        let mut enabled = Vec::new();
        if self.exchanges.uniswap.enabled {
            enabled.push(Exchange::Uniswap);
        }
        if self.exchanges.binance.enabled {
            enabled.push(Exchange::Binance);
        }
        if self.exchanges.bybit.enabled {
            enabled.push(Exchange::Bybit);
        }
        enabled
    }

    pub fn token_refs(&self) -> Vec<TokenRef> {
        self.tokens.iter().map(TokenRef::from).collect()
    }

    /// Find a configured token by symbol (case-insensitive) or address
    pub fn find_token(&self, query: &str) -> Result<TokenRef, ConfigError> {
        let by_address = Address::from_str(query).ok();
        self.tokens
            .iter()
            .find(|t| {
                Some(t.address) == by_address
                    || t.symbol.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(query))
            })
            .map(TokenRef::from)
            .ok_or_else(|| ConfigError::ValidationError(format!("token '{}' is not configured", query)))
    }

    pub fn wallet_address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.aggregator.max_attempts,
            initial_backoff: Duration::from_millis(self.aggregator.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.aggregator.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn rpc_config(&self) -> EvmRpcConfig {
        EvmRpcConfig {
            rpc_url: self.chain.get_rpc_url(),
            timeout: Duration::from_secs(self.chain.timeout_secs),
        }
    }

    pub fn uniswap_config(&self) -> UniswapConfig {
        UniswapConfig {
            endpoint: self.exchanges.uniswap.endpoint.clone(),
            timeout: Duration::from_secs(self.exchanges.uniswap.timeout_secs),
            ..UniswapConfig::default()
        }
    }

    pub fn binance_config(&self) -> BinanceConfig {
        let section = &self.exchanges.binance;
        let defaults = BinanceConfig::default();
        BinanceConfig {
            base_url: section.base_url.clone().unwrap_or(defaults.base_url),
            api_key: section.get_api_key("BINANCE_API_KEY"),
            symbols: section.symbol_table(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }

    pub fn bybit_config(&self) -> BybitConfig {
        let section = &self.exchanges.bybit;
        let defaults = BybitConfig::default();
        BybitConfig {
            base_url: section.base_url.clone().unwrap_or(defaults.base_url),
            api_key: section.get_api_key("BYBIT_API_KEY"),
            symbols: section.symbol_table(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }
}

impl From<&Config> for AggregatorConfig {
    fn from(config: &Config) -> Self {
        let section = &config.aggregator;
        AggregatorConfig {
            retry: config.retry_policy(),
            call_timeout: call_timeout(section.call_timeout_secs),
            sample_delay: Duration::from_millis(section.sample_delay_ms),
            quote_currencies: [
                (Exchange::Uniswap, config.exchanges.uniswap.quote),
                (Exchange::Binance, config.exchanges.binance.quote),
                (Exchange::Bybit, config.exchanges.bybit.quote),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl From<&Config> for ScannerConfig {
    fn from(config: &Config) -> Self {
        ScannerConfig {
            avg_block_time: Duration::from_secs(config.chain.avg_block_time_secs),
            max_block_span: config.chain.max_block_span,
            span_concurrency: config.chain.span_concurrency,
            retry: config.retry_policy(),
            call_timeout: call_timeout(config.chain.call_timeout_secs),
        }
    }
}

impl From<&Config> for RankerConfig {
    fn from(config: &Config) -> Self {
        RankerConfig {
            chunk_size: config.holders.chunk_size,
            chunk_concurrency: config.holders.chunk_concurrency,
            max_chunks: config.holders.max_chunks,
            retry: config.retry_policy(),
            call_timeout: call_timeout(config.holders.call_timeout_secs),
        }
    }
}

fn call_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAND: Address = address!("3845badAde8e6dFF049820680d1F14bD3903a5d0");

    fn create_valid_config() -> String {
        r#"
[chain]
rpc_url = "https://cloudflare-eth.com"
avg_block_time_secs = 12
max_block_span = 5000

[wallet]
address = "0x0000000000000000000000000000000000000001"

[[tokens]]
address = "0x3845badAde8e6dFF049820680d1F14bD3903a5d0"
symbol = "SAND"

[[tokens]]
address = "0x0F5D2fB29fb7d3CFeE444a200298f468908cC942"
symbol = "MANA"
decimals = 18

[exchanges.uniswap]
enabled = true

[exchanges.binance]
api_key = "from-file"
quote = "USDT"

[exchanges.binance.symbols]
"0x3845badAde8e6dFF049820680d1F14bD3903a5d0" = "SAND"
"0x0F5D2fB29fb7d3CFeE444a200298f468908cC942" = "MANA"

[exchanges.bybit]
enabled = false

[aggregator]
max_attempts = 4
sample_delay_ms = 250

[holders]
chunk_size = 50
call_timeout_secs = 0

[logging]
level = "debug"
"#
        .to_string()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.tokens[0].address, SAND);
        assert_eq!(config.tokens[0].decimals, 18);
        assert_eq!(config.chain.max_block_span, 5000);
        assert_eq!(config.chain.lookback_blocks, 50_000);
        assert_eq!(config.enabled_exchanges(), vec![Exchange::Uniswap, Exchange::Binance]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.wallet_address(), Some(Address::with_last_byte(1)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(
            r#"
[[tokens]]
address = "0x3845badAde8e6dFF049820680d1F14bD3903a5d0"
"#,
        );
        let config = load_config(file.path()).unwrap();

        assert!(config.wallet.is_none());
        assert_eq!(config.aggregator.max_attempts, 3);
        assert_eq!(config.holders.chunk_size, 100);
        assert_eq!(config.exchanges.uniswap.quote, QuoteCurrency::Eth);
        assert_eq!(config.exchanges.bybit.quote, QuoteCurrency::Usdt);
        assert_eq!(config.enabled_exchanges().len(), 3);
    }

    #[test]
    fn test_missing_tokens_is_parse_error() {
        let file = write_config("[chain]\nrpc_url = \"http://localhost:8545\"\n");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_empty_tokens_is_invalid() {
        let file = write_config("tokens = []\n");
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_bad_symbol_key_is_invalid() {
        let file = write_config(
            r#"
[[tokens]]
address = "0x3845badAde8e6dFF049820680d1F14bD3903a5d0"

[exchanges.bybit.symbols]
SAND = "SAND"
"#,
        );
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_duplicate_token_is_invalid() {
        let file = write_config(
            r#"
[[tokens]]
address = "0x3845badAde8e6dFF049820680d1F14bD3903a5d0"

[[tokens]]
address = "0x3845BADADE8E6DFF049820680D1F14BD3903A5D0"
"#,
        );
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_all_exchanges_disabled_is_invalid() {
        let file = write_config(
            r#"
[[tokens]]
address = "0x3845badAde8e6dFF049820680d1F14bD3903a5d0"

[exchanges.uniswap]
enabled = false
[exchanges.binance]
enabled = false
[exchanges.bybit]
enabled = false
"#,
        );
        assert!(matches!(load_config(file.path()).unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_find_token_by_symbol_or_address() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.find_token("sand").unwrap().address, SAND);
        assert_eq!(
            config.find_token("0x3845badade8e6dff049820680d1f14bd3903a5d0").unwrap().symbol.as_deref(),
            Some("SAND")
        );
        assert!(config.find_token("PRIME").is_err());
    }

    #[test]
    fn test_component_configs() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        let binance = config.binance_config();
        assert_eq!(binance.api_key.as_deref(), Some("from-file"));
        assert_eq!(binance.symbols.get(&SAND).map(String::as_str), Some("SAND"));
        assert_eq!(binance.base_url, "https://api.binance.com");

        let aggregator = AggregatorConfig::from(&config);
        assert_eq!(aggregator.retry.max_attempts, 4);
        assert_eq!(aggregator.sample_delay, Duration::from_millis(250));
        assert_eq!(aggregator.quote_currencies[&Exchange::Uniswap], QuoteCurrency::Eth);

        let scanner = ScannerConfig::from(&config);
        assert_eq!(scanner.max_block_span, 5000);
        assert_eq!(scanner.avg_block_time, Duration::from_secs(12));
        assert_eq!(scanner.call_timeout, Some(Duration::from_secs(120)));

        let ranker = RankerConfig::from(&config);
        assert_eq!(ranker.chunk_size, 50);
        assert_eq!(ranker.call_timeout, None);
    }
}
