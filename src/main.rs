//! erc20-scout - Multi-source ERC-20 price, holder and transfer aggregator

use anyhow::Result;
use clap::Parser;

use erc20_scout::adapters::cli::{self, CliApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys and ETH_RPC_URL go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    cli::execute(app).await
}
