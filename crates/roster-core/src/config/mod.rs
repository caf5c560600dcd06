mod cluster;
mod directory;
mod observability;

pub use cluster::ClusterConfig;
pub use directory::DirectoryConfig;
pub use observability::{LogFormat, ObservabilityConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, RosterError};

/// Root configuration for a roster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RosterConfig {
    /// Directory service connection.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Cluster membership settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// What this node advertises.
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl RosterConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RosterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| RosterError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;
        if self.node.address.trim().is_empty() {
            return Err(RosterError::Config("node.address must not be empty".into()));
        }
        if self.directory.address.trim().is_empty() {
            return Err(RosterError::Config(
                "directory.address must not be empty".into(),
            ));
        }
        if self.directory.request_timeout_secs == 0 {
            return Err(RosterError::Config(
                "directory.request_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Network location and roles this node advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address peers use to reach this node.
    #[serde(default = "default_node_address")]
    pub address: String,

    /// Port peers use to reach this node.
    #[serde(default = "default_node_port")]
    pub port: u16,

    /// Kinds this node can host.
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_node_address(),
            port: default_node_port(),
            kinds: Vec::new(),
        }
    }
}

fn default_node_address() -> String {
    "127.0.0.1".to_string()
}

fn default_node_port() -> u16 {
    8090
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| RosterError::Internal(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    Ok(result)
}
