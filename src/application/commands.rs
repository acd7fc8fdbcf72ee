//! CLI commands and handlers
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::application::bootstrap::{self, load_cost_model};
use crate::shared::config::EngineConfig;
use crate::shared::errors::AppError;
use crate::shared::utils::format_amount;

#[derive(Parser)]
#[command(name = "crossarb")]
#[command(version, about = "Cross-market arbitrage engine with atomic borrowing and private submission")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "Config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Policy overrides shared by the trading commands
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Minimum net profit, accounting-token units
    #[arg(long)]
    pub min_profit: Option<f64>,

    /// Maximum hops per path
    #[arg(long)]
    pub max_hops: Option<usize>,
}

impl PolicyArgs {
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(min_profit) = self.min_profit {
            config.search.min_profit = min_profit;
        }
        if let Some(max_hops) = self.max_hops {
            config.search.max_hops = max_hops;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator loop
    Run {
        /// Submit through the paper channel even if a relay is configured
        #[arg(long)]
        paper: bool,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Refresh quotes once and print ranked opportunities
    Scan {
        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Print persisted cost model statistics
    Costs,

    /// Validate the configuration and exit
    CheckConfig,
}

pub struct CommandExecutor;

impl CommandExecutor {
    /// Execute the selected command
    pub async fn execute(command: Commands, mut config: EngineConfig) -> Result<(), AppError> {
        match command {
            Commands::Run { paper, duration, policy } => {
                policy.apply(&mut config);
                Self::execute_run_command(paper, duration, config).await
            }
            Commands::Scan { policy } => {
                policy.apply(&mut config);
                Self::execute_scan_command(config).await
            }
            Commands::Costs => Self::execute_costs_command(config),
            Commands::CheckConfig => Self::execute_check_config_command(config),
        }
    }

    async fn execute_run_command(paper: bool, duration: Option<u64>, config: EngineConfig) -> Result<(), AppError> {
        let engine = bootstrap::build(&config, paper).await?;

        let control = engine.control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 interrupt received, finishing in-flight attempts");
                control.stop();
            }
        });

        let snapshot = engine.coordinator.run(duration.map(Duration::from_secs)).await?;

        info!("📊 Run summary:");
        info!("   Cycles: {}", snapshot.cycles);
        info!("   Attempts: {}", snapshot.recent_results.len());
        info!(
            "   Included: {}",
            snapshot.recent_results.iter().filter(|r| r.outcome.is_success()).count()
        );
        info!("   Abandoned: {}", snapshot.abandoned.len());
        info!("   Realized profit: {}", format_amount(snapshot.total_realized_profit(), 6));
        for allocation in &snapshot.treasury {
            info!(
                "   Treasury {}: held {} reserved {}",
                allocation.token,
                format_amount(allocation.held, 6),
                format_amount(allocation.reserved, 6)
            );
        }
        Ok(())
    }

    async fn execute_scan_command(config: EngineConfig) -> Result<(), AppError> {
        let engine = bootstrap::build(&config, true).await?;
        let opportunities = engine.coordinator.scan().await;

        if opportunities.is_empty() {
            info!("🔍 No opportunity clears the profit threshold");
            return Ok(());
        }
        info!("🔍 {} opportunities:", opportunities.len());
        for (i, opportunity) in opportunities.iter().enumerate() {
            info!(
                "   {}. {} | in {} out {} | net {} (costs {})",
                i + 1,
                opportunity.path.describe(),
                format_amount(opportunity.amount_in, 6),
                format_amount(opportunity.expected_output, 6),
                format_amount(opportunity.net_profit, 6),
                format_amount(opportunity.costs.total(), 6)
            );
        }
        Ok(())
    }

    fn execute_costs_command(config: EngineConfig) -> Result<(), AppError> {
        if config.cost_model.store_path.is_none() {
            warn!("cost_model.store_path is not set, showing seeded estimates only");
        }
        let model = load_cost_model(&config)?;
        let summary = model.summary();
        info!("📈 Cost model: {} tracked keys", summary.tracked_keys);
        for record in &summary.entries {
            info!(
                "   {} {}: expected {} variance {} samples {} (updated {})",
                record.venue,
                record.operation_type.as_str(),
                format_amount(record.expected_cost, 8),
                format_amount(record.variance, 10),
                record.sample_count,
                record.last_updated.to_rfc3339()
            );
        }
        Ok(())
    }

    fn execute_check_config_command(config: EngineConfig) -> Result<(), AppError> {
        config.validate()?;
        info!("✅ Configuration is valid");
        info!("   Tokens: {}", config.tokens.len());
        info!("   Venues: {}", config.venues.len());
        info!("   Lenders: {}", config.lenders.len());
        info!("   Start tokens: {}", config.search.start_tokens.join(", "));
        info!(
            "   Submission: {}",
            config.network.relay_url.as_deref().unwrap_or("paper channel")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags_parse_and_override() {
        let cli = Cli::try_parse_from([
            "crossarb",
            "--config",
            "local.toml",
            "run",
            "--paper",
            "--duration",
            "5",
            "--min-profit",
            "0.01",
            "--max-hops",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.config, "local.toml");
        let Commands::Run { paper, duration, policy } = cli.command else {
            panic!("expected run");
        };
        assert!(paper);
        assert_eq!(duration, Some(5));

        let mut config = EngineConfig::default();
        policy.apply(&mut config);
        assert_eq!(config.search.min_profit, 0.01);
        assert_eq!(config.search.max_hops, 4);
    }

    #[test]
    fn test_check_config_subcommand_uses_default_path() {
        let cli = Cli::try_parse_from(["crossarb", "check-config"]).unwrap();
        assert_eq!(cli.config, "Config.toml");
        assert!(matches!(cli.command, Commands::CheckConfig));
    }
}
