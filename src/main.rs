use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use promptforge::cli::{self, Cli};
use promptforge::config::AppConfig;
use promptforge::manager::Manager;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the generated results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Auto-generate config file on first run
    let config_path = AppConfig::config_path()?;
    if !config_path.exists() {
        let path = AppConfig::save_default()?;
        eprintln!("[Config] Created default config: {}", path.display());
        eprintln!("[Config] Edit it to set your OpenAI key and Slack channel/bot ids.");
    }

    let config = AppConfig::load()?;
    let manager = Manager::new(config)?;
    tracing::info!(supplies = ?manager.supply_names(), "manager ready");

    cli::run(cli, &manager).await
}
