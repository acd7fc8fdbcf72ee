use anyhow::{Context, Result};
use clap::Parser;

use crossarb::application::{Cli, CommandExecutor};
use crossarb::shared::config::EngineConfig;
use crossarb::shared::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    logging::init(&config.log_level);

    CommandExecutor::execute(cli.command, config).await?;
    Ok(())
}
