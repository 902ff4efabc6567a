//! CLI Adapter
//!
//! Command-line interface for erc20-scout.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{CliApp, Command, PriceCmd, HistoryCmd, TransfersCmd, HoldersCmd, PortfolioCmd};

use anyhow::Result;

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    commands::execute(app).await
}
