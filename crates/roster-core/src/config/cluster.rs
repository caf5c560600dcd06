use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RosterError};

/// Cluster membership configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name. Used as the directory service name.
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// TTL of the health check in seconds.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// How often the TTL is renewed, in milliseconds. Must be shorter than
    /// the TTL.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_ms: u64,

    /// How long a critical instance stays registered before the directory
    /// removes it (in seconds).
    #[serde(default = "default_deregister_critical")]
    pub deregister_critical_secs: u64,

    /// Upper bound for a blocking topology query (in seconds).
    #[serde(default = "default_blocking_wait")]
    pub blocking_wait_secs: u64,

    /// First delay after a failed topology query (in milliseconds).
    #[serde(default = "default_watch_retry_initial")]
    pub watch_retry_initial_ms: u64,

    /// Cap for the topology retry delay (in milliseconds).
    #[serde(default = "default_watch_retry_max")]
    pub watch_retry_max_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            ttl_secs: default_ttl(),
            refresh_ttl_ms: default_refresh_ttl(),
            deregister_critical_secs: default_deregister_critical(),
            blocking_wait_secs: default_blocking_wait(),
            watch_retry_initial_ms: default_watch_retry_initial(),
            watch_retry_max_ms: default_watch_retry_max(),
        }
    }
}

impl ClusterConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_millis(self.refresh_ttl_ms)
    }

    pub fn deregister_critical(&self) -> Duration {
        Duration::from_secs(self.deregister_critical_secs)
    }

    pub fn blocking_wait(&self) -> Duration {
        Duration::from_secs(self.blocking_wait_secs)
    }

    pub fn watch_retry_initial(&self) -> Duration {
        Duration::from_millis(self.watch_retry_initial_ms)
    }

    pub fn watch_retry_max(&self) -> Duration {
        Duration::from_millis(self.watch_retry_max_ms)
    }

    /// Reject settings the membership engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RosterError::Config("cluster.name must not be empty".into()));
        }
        if self.ttl_secs == 0 || self.refresh_ttl_ms == 0 || self.blocking_wait_secs == 0 {
            return Err(RosterError::Config(
                "cluster durations must be greater than zero".into(),
            ));
        }
        if self.refresh_ttl() >= self.ttl() {
            return Err(RosterError::Config(format!(
                "cluster.refresh_ttl_ms ({}) must be shorter than cluster.ttl_secs ({}s)",
                self.refresh_ttl_ms, self.ttl_secs
            )));
        }
        if self.watch_retry_initial_ms > self.watch_retry_max_ms {
            return Err(RosterError::Config(
                "cluster.watch_retry_initial_ms must not exceed cluster.watch_retry_max_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_cluster_name() -> String {
    "roster".to_string()
}

fn default_ttl() -> u64 {
    3
}

fn default_refresh_ttl() -> u64 {
    1000
}

fn default_deregister_critical() -> u64 {
    60
}

fn default_blocking_wait() -> u64 {
    20
}

fn default_watch_retry_initial() -> u64 {
    100
}

fn default_watch_retry_max() -> u64 {
    5000
}
