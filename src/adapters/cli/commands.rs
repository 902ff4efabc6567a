//! CLI Command Handlers
//!
//! Implementation of all CLI commands for erc20-scout.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::adapters::evm::EvmRpcClient;
use crate::adapters::exchange::{BinanceClient, BybitClient, UniswapClient};
use crate::application::{
    AggregationError, AggregatorConfig, ChainEventScanner, HolderRanker, PriceAggregator, RankerConfig,
    ScanRange, ScannerConfig,
};
use crate::config::{load_config, Config};
use crate::domain::{Exchange, QuoteCurrency, TokenRef};

/// erc20-scout - Multi-source ERC-20 price, holder and transfer aggregator
#[derive(Parser, Debug)]
#[command(
    name = "erc20-scout",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Multi-source ERC-20 price, holder and transfer aggregator",
    long_about = "erc20-scout reconciles prices from Uniswap, Binance and Bybit, ranks \
                  token holders from chain state and rebuilds wallet transfer history \
                  from ERC-20 Transfer events."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    pub config: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Current price on every configured exchange
    Price(PriceCmd),

    /// Daily price samples from one exchange
    History(HistoryCmd),

    /// Wallet transfer history from Transfer events
    Transfers(TransfersCmd),

    /// Largest token holders
    Holders(HoldersCmd),

    /// Value the wallet's holdings of every configured token
    Portfolio(PortfolioCmd),
}

#[derive(Parser, Debug)]
pub struct PriceCmd {
    /// Token symbol or address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Restrict to these exchanges (repeatable)
    #[arg(short, long = "exchange", value_name = "EXCHANGE")]
    pub exchanges: Vec<Exchange>,
}

#[derive(Parser, Debug)]
pub struct HistoryCmd {
    /// Token symbol or address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Number of daily samples (default: aggregator.history_days)
    #[arg(short, long, value_name = "DAYS")]
    pub days: Option<u32>,

    /// Exchange to sample
    #[arg(short, long, value_name = "EXCHANGE", default_value = "binance")]
    pub exchange: Exchange,
}

#[derive(Parser, Debug)]
pub struct TransfersCmd {
    /// Token symbol or address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Wallet address (default: [wallet] from config)
    #[arg(short, long, value_name = "ADDRESS")]
    pub wallet: Option<String>,

    /// First block to scan
    #[arg(long, value_name = "BLOCK", requires = "to_block")]
    pub from_block: Option<u64>,

    /// Last block to scan
    #[arg(long, value_name = "BLOCK", requires = "from_block")]
    pub to_block: Option<u64>,

    /// Scan the last N days
    #[arg(long, value_name = "DAYS", default_value = "7", conflicts_with = "from_block")]
    pub days: i64,

    /// List every transfer of the token in the last N blocks instead
    #[arg(long, value_name = "BLOCKS", num_args = 0..=1, default_missing_value = "0")]
    pub recent: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct HoldersCmd {
    /// Token symbol or address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Number of holders to show (default: holders.top_n)
    #[arg(short = 'n', long, value_name = "N")]
    pub top: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct PortfolioCmd {
    /// Wallet address (default: [wallet] from config)
    #[arg(short, long, value_name = "ADDRESS")]
    pub wallet: Option<String>,

    /// Restrict to these exchanges (repeatable)
    #[arg(short, long = "exchange", value_name = "EXCHANGE")]
    pub exchanges: Vec<Exchange>,
}

/// Execute the parsed command
pub async fn execute(app: CliApp) -> Result<()> {
    let config_path = shellexpand::tilde(&app.config.to_string_lossy()).to_string();
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_logging(app.verbose, app.debug, &config.logging.level)?;
    tracing::debug!(config = %config_path, "Configuration loaded");

    match app.command {
        Command::Price(cmd) => price_command(&config, cmd, app.json).await,
        Command::History(cmd) => history_command(&config, cmd, app.json).await,
        Command::Transfers(cmd) => transfers_command(&config, cmd, app.json).await,
        Command::Holders(cmd) => holders_command(&config, cmd, app.json).await,
        Command::Portfolio(cmd) => portfolio_command(&config, cmd, app.json).await,
    }
}

/// Initialize logging system
///
/// `--debug` and `--verbose` win, then `RUST_LOG`, then `[logging] level`.
fn init_logging(verbose: bool, debug: bool, config_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

fn build_aggregator(config: &Config) -> Result<PriceAggregator> {
    let mut aggregator = PriceAggregator::new(AggregatorConfig::from(config));
    if config.exchanges.uniswap.enabled {
        let client = UniswapClient::with_config(config.uniswap_config()).context("Failed to create Uniswap client")?;
        aggregator = aggregator.with_client(Arc::new(client));
    }
    if config.exchanges.binance.enabled {
        let client = BinanceClient::new(config.binance_config()).context("Failed to create Binance client")?;
        aggregator = aggregator.with_client(Arc::new(client));
    }
    if config.exchanges.bybit.enabled {
        let client = BybitClient::new(config.bybit_config()).context("Failed to create Bybit client")?;
        aggregator = aggregator.with_client(Arc::new(client));
    }
    Ok(aggregator)
}

fn build_chain(config: &Config) -> Result<Arc<EvmRpcClient>> {
    let client = EvmRpcClient::new(config.rpc_config()).context("Failed to create RPC client")?;
    tracing::debug!(rpc = %client.rpc_url(), "Using RPC endpoint");
    Ok(Arc::new(client))
}

/// Configured token by symbol/address, or an ad-hoc token for an unlisted address
fn resolve_token(config: &Config, query: &str) -> Result<TokenRef> {
    match config.find_token(query) {
        Ok(token) => Ok(token),
        Err(e) => match Address::from_str(query) {
            Ok(address) => Ok(TokenRef::new(address)),
            Err(_) => Err(e).context("Unknown token"),
        },
    }
}

fn resolve_wallet(config: &Config, flag: Option<&str>) -> Result<Address> {
    match flag {
        Some(raw) => Address::from_str(raw).with_context(|| format!("Invalid wallet address '{}'", raw)),
        None => match config.wallet_address() {
            Some(address) => Ok(address),
            None => bail!("No wallet given: pass --wallet or set [wallet] address in the config"),
        },
    }
}

fn exchanges_or_enabled(config: &Config, requested: Vec<Exchange>) -> Vec<Exchange> {
    if requested.is_empty() {
        config.enabled_exchanges()
    } else {
        requested
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

/// Handle price command
async fn price_command(config: &Config, cmd: PriceCmd, json: bool) -> Result<()> {
    let token = resolve_token(config, &cmd.token)?;
    let exchanges = exchanges_or_enabled(config, cmd.exchanges);
    tracing::info!(token = %token.label(), ?exchanges, "Aggregating price");

    let aggregator = build_aggregator(config)?;
    let aggregated = match aggregator.aggregate(&token, &exchanges).await {
        Ok(aggregated) => aggregated,
        Err(AggregationError::AllSourcesUnavailable { token, absent }) => {
            for (exchange, absence) in &absent {
                eprintln!("  {:<8} {}", exchange, absence);
            }
            bail!("No exchange returned a price for {}", token);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return print_json(&aggregated);
    }

    println!("{} ({})", token.label(), token.checksummed());
    for (exchange, quote) in &aggregated.quotes {
        println!("  {:<8} {} {}", exchange, quote.price(), quote.quote_currency);
    }
    for (exchange, absence) in &aggregated.absent {
        println!("  {:<8} -  ({})", exchange, absence);
    }
    Ok(())
}

/// Handle history command
async fn history_command(config: &Config, cmd: HistoryCmd, json: bool) -> Result<()> {
    let token = resolve_token(config, &cmd.token)?;
    let days = cmd.days.unwrap_or(config.aggregator.history_days);
    tracing::info!(token = %token.label(), days, exchange = %cmd.exchange, "Sampling price history");

    let aggregator = build_aggregator(config)?;
    let series = aggregator
        .historical_series(&token, days, cmd.exchange)
        .await
        .context("Failed to sample price history")?;

    if json {
        return print_json(&series);
    }

    println!("{} on {}", token.label(), cmd.exchange);
    for point in &series {
        match (&point.quote, &point.gap) {
            (Some(quote), _) => println!("  {}  {} {}", point.date, quote.price(), quote.quote_currency),
            (None, Some(gap)) => println!("  {}  -  ({})", point.date, gap),
            (None, None) => println!("  {}  -", point.date),
        }
    }
    Ok(())
}

/// Handle transfers command
async fn transfers_command(config: &Config, cmd: TransfersCmd, json: bool) -> Result<()> {
    let token = resolve_token(config, &cmd.token)?;
    let scanner = ChainEventScanner::new(build_chain(config)?, ScannerConfig::from(config));

    if let Some(recent) = cmd.recent {
        let lookback = if recent == 0 { config.chain.lookback_blocks } else { recent };
        let transfers = scanner
            .recent_transfers(&token, lookback)
            .await
            .context("Failed to scan recent transfers")?;
        if json {
            return print_json(&transfers);
        }
        println!(
            "{} transfers of {} in blocks {}..={}",
            transfers.events.len(),
            token.label(),
            transfers.from_block,
            transfers.to_block
        );
        for event in &transfers.events {
            println!(
                "  {}  #{}  {} -> {}  {}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.block_number,
                event.from,
                event.to,
                event.amount().map(|a| a.to_string()).unwrap_or_else(|_| event.value.to_string()),
            );
        }
        report_failed_spans(&transfers.failed_spans);
        return Ok(());
    }

    let wallet = resolve_wallet(config, cmd.wallet.as_deref())?;
    let range = match (cmd.from_block, cmd.to_block) {
        (Some(from), Some(to)) => ScanRange::Blocks { from, to },
        _ => {
            let end = Utc::now();
            ScanRange::Window { start: window_start(end, cmd.days)?, end }
        }
    };

    let transfers = scanner
        .scan_transfers(&token, wallet, range)
        .await
        .context("Failed to scan wallet transfers")?;

    if json {
        return print_json(&transfers);
    }

    println!(
        "{} records for {} in blocks {}..={}",
        transfers.records.len(),
        wallet,
        transfers.from_block,
        transfers.to_block
    );
    for record in &transfers.records {
        let amount = record
            .signed_amount()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| record.event.value.to_string());
        println!(
            "  {}  #{}  {:?}  {}  {}",
            record.event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.event.block_number,
            record.direction,
            record.counterparty(),
            amount,
        );
    }
    if transfers.skipped > 0 {
        println!("  ({} malformed logs skipped)", transfers.skipped);
    }
    report_failed_spans(&transfers.failed_spans);
    Ok(())
}

fn report_failed_spans(spans: &[crate::application::BlockSpan]) {
    for span in spans {
        eprintln!("  warning: blocks {}..={} could not be read", span.from, span.to);
    }
}

/// Handle holders command
async fn holders_command(config: &Config, cmd: HoldersCmd, json: bool) -> Result<()> {
    let token = resolve_token(config, &cmd.token)?;
    let top = cmd.top.unwrap_or(config.holders.top_n);
    let ranker = HolderRanker::new(build_chain(config)?, RankerConfig::from(config));

    let ranking = ranker
        .top_holders(&token, top)
        .await
        .with_context(|| format!("Failed to rank holders of {}", token.label()))?;

    if json {
        return print_json(&ranking);
    }

    println!("Top {} holders of {}", ranking.holders.len(), token.label());
    for (rank, holder) in ranking.holders.iter().enumerate() {
        let amount = holder
            .amount(&token)
            .map(|a| a.to_string())
            .unwrap_or_else(|_| holder.balance.to_string());
        println!("  {:>3}. {}  {}", rank + 1, holder.address, amount);
    }
    if !ranking.is_complete() {
        eprintln!("  warning: {} chunks could not be read", ranking.failed_chunks.len());
    }
    Ok(())
}

/// Handle portfolio command
async fn portfolio_command(config: &Config, cmd: PortfolioCmd, json: bool) -> Result<()> {
    let wallet = resolve_wallet(config, cmd.wallet.as_deref())?;
    let exchanges = exchanges_or_enabled(config, cmd.exchanges);
    let ranker = HolderRanker::new(build_chain(config)?, RankerConfig::from(config));
    let aggregator = build_aggregator(config)?;

    let mut valuations = Vec::new();
    for token in config.token_refs() {
        let balances = ranker
            .balances_of(&token, &[wallet])
            .await
            .with_context(|| format!("Failed to read {} balance", token.label()))?;
        let Some(balance) = balances.first() else { continue };
        if balance.balance.is_zero() {
            tracing::debug!(token = %token.label(), "Skipping empty balance");
            continue;
        }
        let quantity = balance.amount(&token).context("Balance does not fit a decimal")?;

        match aggregator.portfolio_value(&token, quantity, &exchanges).await {
            Ok(valuation) => valuations.push(valuation),
            Err(e) => tracing::warn!(token = %token.label(), error = %e, "No price for holding"),
        }
    }

    if json {
        return print_json(&valuations);
    }

    println!("Portfolio of {}", wallet);
    for valuation in &valuations {
        println!("  {} x {}", valuation.quantity, valuation.token.label());
        for (exchange, value) in &valuation.per_exchange {
            println!("    {:<8} {} {}", exchange, value.value, value.quote_currency);
        }
        for exchange in &valuation.absent {
            println!("    {:<8} -", exchange);
        }
    }
    for currency in [QuoteCurrency::Usdt, QuoteCurrency::Eth] {
        let total: rust_decimal::Decimal = valuations.iter().map(|v| v.total(currency)).sum();
        if !total.is_zero() {
            println!("  Total ({}): {}", currency, total);
        }
    }
    Ok(())
}

/// Start of a window reaching `days` back from `end`
fn window_start(end: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    ChronoDuration::try_days(days.max(0))
        .and_then(|lookback| end.checked_sub_signed(lookback))
        .ok_or_else(|| anyhow::anyhow!("--days {} is out of range", days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_app_parse_price() {
        let args = vec!["erc20-scout", "price", "SAND", "-e", "binance", "--exchange", "bybit"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Price(cmd) => {
                assert_eq!(cmd.token, "SAND");
                assert_eq!(cmd.exchanges, vec![Exchange::Binance, Exchange::Bybit]);
            }
            _ => panic!("Expected Price command"),
        }
    }

    #[test]
    fn test_cli_app_parse_history() {
        let args = vec!["erc20-scout", "history", "MANA", "--days", "5"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::History(cmd) => {
                assert_eq!(cmd.days, Some(5));
                assert_eq!(cmd.exchange, Exchange::Binance);
            }
            _ => panic!("Expected History command"),
        }
    }

    #[test]
    fn test_cli_app_parse_transfers_blocks() {
        let args = vec!["erc20-scout", "transfers", "SAND", "--from-block", "100", "--to-block", "200"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Transfers(cmd) => {
                assert_eq!(cmd.from_block, Some(100));
                assert_eq!(cmd.to_block, Some(200));
                assert!(cmd.recent.is_none());
            }
            _ => panic!("Expected Transfers command"),
        }
    }

    #[test]
    fn test_transfers_block_bounds_come_in_pairs() {
        let args = vec!["erc20-scout", "transfers", "SAND", "--from-block", "100"];
        assert!(CliApp::try_parse_from(args).is_err());
    }

    #[test]
    fn test_cli_app_parse_transfers_recent() {
        let app = CliApp::try_parse_from(vec!["erc20-scout", "transfers", "SAND", "--recent"]).unwrap();
        match app.command {
            Command::Transfers(cmd) => assert_eq!(cmd.recent, Some(0)),
            _ => panic!("Expected Transfers command"),
        }

        let app = CliApp::try_parse_from(vec!["erc20-scout", "transfers", "SAND", "--recent", "500"]).unwrap();
        match app.command {
            Command::Transfers(cmd) => assert_eq!(cmd.recent, Some(500)),
            _ => panic!("Expected Transfers command"),
        }
    }

    #[test]
    fn test_cli_app_parse_holders() {
        let args = vec!["erc20-scout", "holders", "SAND", "-n", "25"];
        let app = CliApp::try_parse_from(args).unwrap();

        match app.command {
            Command::Holders(cmd) => assert_eq!(cmd.top, Some(25)),
            _ => panic!("Expected Holders command"),
        }
    }

    #[test]
    fn test_unknown_exchange_is_rejected() {
        let args = vec!["erc20-scout", "price", "SAND", "-e", "kraken"];
        assert!(CliApp::try_parse_from(args).is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = vec!["erc20-scout", "-v", "--debug", "--json", "portfolio"];
        let app = CliApp::try_parse_from(args).unwrap();

        assert!(app.verbose);
        assert!(app.debug);
        assert!(app.json);
    }

    #[test]
    fn test_window_start_rejects_out_of_range_days() {
        let end = Utc::now();
        assert_eq!(window_start(end, 7).unwrap(), end - ChronoDuration::days(7));
        assert_eq!(window_start(end, -3).unwrap(), end);
        assert!(window_start(end, i64::MAX).is_err());
        assert!(window_start(end, 200_000_000).is_err());
    }

    #[test]
    fn test_default_config_path() {
        let app = CliApp::try_parse_from(vec!["erc20-scout", "portfolio"]).unwrap();
        assert_eq!(app.config, PathBuf::from("config.toml"));

        let app = CliApp::try_parse_from(vec!["erc20-scout", "holders", "SAND", "-c", "~/scout.toml"]).unwrap();
        assert_eq!(app.config, PathBuf::from("~/scout.toml"));
    }
}
