use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use roster::RosterNode;
use roster_core::cluster::{JsonStatusSerializer, MemberRecord, TopologySnapshot};
use serde_json::Value;

/// Print the cluster members once.
#[derive(Parser)]
pub struct MembersCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "roster.toml")]
    pub config: String,

    /// Print the snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

impl MembersCommand {
    /// Execute the members command.
    pub async fn execute(self) -> Result<()> {
        let config = super::load_config(&self.config)?;
        let node = RosterNode::from_config(config)?;

        let snapshot = node
            .members(&JsonStatusSerializer::<Value>::new())
            .await
            .context("Failed to query cluster members")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        } else {
            print_table(node.config().cluster.name.as_str(), &snapshot);
        }
        Ok(())
    }
}

fn print_table(cluster: &str, snapshot: &TopologySnapshot<Value>) {
    println!();
    println!(
        "  {} {} ({} members, index {}, {})",
        style("cluster").dim(),
        style(cluster).bold(),
        snapshot.len(),
        snapshot.index,
        snapshot.observed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    if snapshot.is_empty() {
        println!("  {}", style("no members").dim());
        println!();
        return;
    }

    let width = snapshot
        .members
        .iter()
        .map(|m| m.member_id.len())
        .max()
        .unwrap_or(0);

    for member in &snapshot.members {
        println!(
            "  {:<width$}  {}  {:<24}  {}",
            member.member_id,
            health_label(member),
            member.kinds.join(","),
            status_label(member),
            width = width
        );
    }
    println!();
}

fn health_label(member: &MemberRecord<Value>) -> String {
    if member.alive {
        style("alive").green().to_string()
    } else {
        style("down ").red().to_string()
    }
}

fn status_label(member: &MemberRecord<Value>) -> String {
    match &member.status_value {
        Some(value) => value.to_string(),
        None => style("-").dim().to_string(),
    }
}
