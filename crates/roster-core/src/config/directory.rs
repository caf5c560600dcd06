use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory service connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the local Consul agent.
    #[serde(default = "default_address")]
    pub address: String,

    /// ACL token sent with every request.
    #[serde(default)]
    pub token: Option<String>,

    /// Datacenter for health queries. Defaults to the agent's own.
    #[serde(default)]
    pub datacenter: Option<String>,

    /// Timeout for non-blocking calls (in seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            token: None,
            datacenter: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl DirectoryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_request_timeout() -> u64 {
    10
}
