// crates/bfa-engine/src/main.rs
// bfa - build failure analyzer command line

mod cli;

use anyhow::Result;
use bfa::config::{BfaConfig, EnvOverrides};
use clap::Parser;
use cli::{Cli, Commands};
use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

fn log_level(verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    std::env::var("BFA_LOG_LEVEL")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Level::WARN)
}

#[tokio::main]
async fn main() -> Result<()> {
    // ~/.bfa/.env may set BFA_CONFIG and BFA_LOG_LEVEL
    let _ = dotenvy::from_path(bfa::config::data_dir().join(".env"));

    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(BfaConfig::config_path);
    let mut config = BfaConfig::load_from(&config_path);
    EnvOverrides::from_env().apply(&mut config);
    debug!(path = %config_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Causes { action } => cli::run_causes(&config, action).await?,
        Commands::Categories => cli::run_categories(&config).await?,
        Commands::Scan {
            logs,
            project,
            json,
        } => cli::run_scan(config, logs, project, json).await?,
        Commands::Migrate {
            to,
            path,
            enable_statistics,
        } => cli::run_migrate(config, to, path, enable_statistics).await?,
        Commands::Config { check } => cli::run_config(&config, &config_path, check)?,
    }

    Ok(())
}
