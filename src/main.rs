mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use cli::Cli;
use store_config::ConfigManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _log_guard = logging::init(&manager.config().logging).context("failed to initialize logging")?;

    match manager.source() {
        Some(path) => debug!("Configuration loaded from {:?}", path),
        None => debug!("Using default configuration"),
    }

    cli.command.run(manager.config()).await
}
