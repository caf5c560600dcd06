mod members;
mod run;

pub use members::MembersCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roster_core::config::{LogFormat, ObservabilityConfig, RosterConfig};
use tracing_subscriber::EnvFilter;

/// roster - cluster membership over Consul
#[derive(Parser)]
#[command(name = "roster")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Join the cluster and follow its topology until interrupted.
    Run(RunCommand),

    /// Print the current cluster members.
    Members(MembersCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Members(cmd) => cmd.execute().await,
        }
    }
}

/// Load the configuration file, failing with a readable message.
fn load_config(path: &str) -> Result<RosterConfig> {
    if !std::path::Path::new(path).exists() {
        anyhow::bail!("Configuration file not found: {}", path);
    }
    RosterConfig::from_file(path).with_context(|| format!("Failed to load {}", path))
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the config.
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
