use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use roster::RosterNode;
use roster_core::cluster::{JsonStatusSerializer, TopologyEventStream, TopologySnapshot};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Join the cluster and log topology changes.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "roster.toml")]
    pub config: String,

    /// Initial status value, as JSON.
    #[arg(short, long)]
    pub status: Option<String>,

    /// Advertised port (overrides config).
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        let mut config = super::load_config(&self.config)?;
        super::init_tracing(&config.observability);

        if let Some(port) = self.port {
            config.node.port = port;
        }

        let status: Option<Value> = self
            .status
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .context("--status must be valid JSON")?;

        println!();
        println!(
            "  {} v{}",
            style("roster").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "  {} {} as {}:{}",
            style("cluster").dim(),
            style(&config.cluster.name).bold(),
            config.node.address,
            config.node.port
        );
        println!(
            "  {} {}",
            style("directory").dim(),
            style(&config.directory.address).cyan()
        );
        println!();

        let node = RosterNode::from_config(config)?;
        let stream = Arc::new(TopologyEventStream::<Value>::default());
        let mut snapshots = stream.subscribe();

        let membership = node
            .join(stream.clone(), JsonStatusSerializer::<Value>::new(), status)
            .await
            .context("Failed to join cluster")?;

        let mut previous: Option<TopologySnapshot<Value>> = None;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received");
                    break;
                }
                received = snapshots.recv() => match received {
                    Ok(snapshot) => {
                        log_changes(previous.as_ref(), &snapshot);
                        previous = Some(snapshot);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Skipped {} topology snapshots", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        membership.leave().await.context("Failed to leave cluster")?;
        println!("\n  {} Left cluster", style("✓").green().bold());

        Ok(())
    }
}

fn log_changes(previous: Option<&TopologySnapshot<Value>>, current: &TopologySnapshot<Value>) {
    let Some(previous) = previous else {
        info!(
            index = current.index,
            members = ?current.member_ids(),
            "Initial topology"
        );
        return;
    };

    let diff = current.diff(previous);
    for member_id in &diff.joined {
        info!(index = current.index, member_id = %member_id, "Member joined");
    }
    for member_id in &diff.left {
        info!(index = current.index, member_id = %member_id, "Member left");
    }
    for member_id in &diff.updated {
        info!(index = current.index, member_id = %member_id, "Member updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_defaults() {
        let cmd = RunCommand::try_parse_from(["run"]).unwrap();
        assert_eq!(cmd.config, "roster.toml");
        assert!(cmd.status.is_none());
        assert!(cmd.port.is_none());
    }

    #[test]
    fn test_run_command_port_override() {
        let cmd = RunCommand::try_parse_from(["run", "-p", "4200"]).unwrap();
        assert_eq!(cmd.port, Some(4200));
        assert!(RunCommand::try_parse_from(["run", "--port", "70000"]).is_err());
    }
}
