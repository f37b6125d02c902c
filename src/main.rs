use anyhow::{Context, Result};
use clap::Parser;
use sextant::cli::{self, Cli, Commands};
use sextant::config::AppConfig;
use tracing::info;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

fn read_config(cli: &Cli) -> Result<AppConfig> {
    AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("failed to load configuration from {}", cli.config_dir))
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    AppConfig::load_validated(&cli.config_dir)
        .with_context(|| format!("unusable configuration in {}", cli.config_dir))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Classify { tool, args }) => {
            init_logging_simple();
            let config = load_config(&cli)?;
            let orchestrator = cli::demo_orchestrator(&config)?;
            cli::show_classification(&orchestrator, tool, args, cli.json)?;
        }
        Some(Commands::Route { tool, args }) => {
            init_logging_simple();
            let config = load_config(&cli)?;
            let orchestrator = cli::demo_orchestrator(&config)?;
            cli::show_route(&orchestrator, tool, args, cli.json)?;
        }
        Some(Commands::Plan { tool, args }) => {
            init_logging_simple();
            let config = load_config(&cli)?;
            let orchestrator = cli::demo_orchestrator(&config)?;
            cli::show_plan(&orchestrator, tool, args, cli.json)?;
        }
        Some(Commands::Zones) => {
            cli::show_zones(cli.json)?;
        }
        Some(Commands::Run {
            tool,
            args,
            session,
            user,
            token_budget,
            timeout_secs,
        }) => {
            let config = load_config(&cli)?;
            init_logging(&config.logging);
            let orchestrator = cli::demo_orchestrator(&config)?;
            cli::run_request(
                &orchestrator,
                tool,
                args,
                session,
                user,
                *token_budget,
                *timeout_secs,
                cli.json,
            )
            .await?;
            info!(stats = ?orchestrator.stats(), "run finished");
        }
        Some(Commands::Monitor { ticks, interval_ms }) => {
            let config = load_config(&cli)?;
            init_logging(&config.logging);
            info!("governor monitor started, Ctrl-C to stop");
            cli::monitor(&config, *ticks, *interval_ms, cli.json).await?;
        }
        Some(Commands::Config) => {
            init_logging_simple();
            // Show even an invalid config so the problems can be inspected
            let config = read_config(&cli)?;
            cli::show_config(&config)?;
        }
        None => {
            init_logging_simple();
            load_config(&cli)?;
            println!("sextant {}: no command given, see --help", env!("CARGO_PKG_VERSION"));
            cli::show_zones(cli.json)?;
        }
    }

    Ok(())
}
