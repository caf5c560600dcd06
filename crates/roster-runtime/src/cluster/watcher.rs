use std::sync::Arc;
use std::time::Duration;

use roster_core::cluster::{
    watch_member_id, Directory, MemberRecord, QueryOptions, ServiceEntry, StatusSerializer,
    TopologySink, TopologySnapshot, STATUS_META_KEY,
};
use roster_core::Result;

use super::registry::MemberRegistry;
use super::state::MembershipState;

/// Topology watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Upper bound the directory may hold a blocking query.
    pub wait_time: Duration,
    /// Delay after the first failed query.
    pub retry_initial: Duration,
    /// Cap for the retry delay.
    pub retry_max: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(20),
            retry_initial: Duration::from_millis(100),
            retry_max: Duration::from_secs(5),
        }
    }
}

impl WatchConfig {
    /// Delay before retrying after `attempt` consecutive failures.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_initial
            .saturating_mul(factor)
            .min(self.retry_max)
    }
}

/// Long-polls the directory and publishes every membership change as one
/// complete snapshot.
pub struct TopologyWatcher<S: StatusSerializer> {
    directory: Arc<dyn Directory>,
    registry: Arc<MemberRegistry<S>>,
    sink: Arc<dyn TopologySink<S::Value>>,
    state: Arc<MembershipState>,
    config: WatchConfig,
    index: u64,
}

impl<S: StatusSerializer> TopologyWatcher<S> {
    /// Create a watcher starting from index zero.
    pub fn new(
        directory: Arc<dyn Directory>,
        registry: Arc<MemberRegistry<S>>,
        sink: Arc<dyn TopologySink<S::Value>>,
        state: Arc<MembershipState>,
        config: WatchConfig,
    ) -> Self {
        Self {
            directory,
            registry,
            sink,
            state,
            config,
            index: 0,
        }
    }

    /// Last directory index seen.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Run one blocking query.
    ///
    /// Returns `Ok(true)` when a snapshot was published and `Ok(false)` when
    /// the query timed out without a change. On error the index is kept.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let options = QueryOptions {
            wait_index: self.index,
            wait_time: self.config.wait_time,
        };
        let health = self
            .directory
            .health_service(self.registry.cluster_name(), &options)
            .await?;

        if self.index != 0 && health.last_index == self.index {
            tracing::trace!(index = self.index, "Topology unchanged");
            return Ok(false);
        }
        // Directory indexes start at one.
        self.index = health.last_index.max(1);

        let records: Vec<MemberRecord<S::Value>> = health
            .entries
            .iter()
            .map(|entry| self.record_for(entry))
            .collect();
        let snapshot = TopologySnapshot::new(records, self.index);

        tracing::debug!(
            index = self.index,
            members = snapshot.len(),
            "Publishing topology"
        );
        self.sink.publish(snapshot);
        Ok(true)
    }

    /// Run until shutdown is requested.
    ///
    /// Shutdown is checked before every query, so the loop exits at most one
    /// wait time after it is requested. Only the retry delay is cut short.
    pub async fn run(mut self) {
        let state = self.state.clone();
        let mut failures: u32 = 0;

        loop {
            if state.is_shutdown() {
                break;
            }

            match self.poll_once().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.retry_delay(failures);
                    tracing::warn!(
                        index = self.index,
                        attempt = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to query topology: {}",
                        e
                    );
                    if state.sleep_or_shutdown(delay).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(index = self.index, "Topology watcher stopped");
    }

    fn record_for(&self, entry: &ServiceEntry) -> MemberRecord<S::Value> {
        let service = &entry.service;
        if service.id == self.registry.service_id() && self.registry.refresh_kinds(&service.tags) {
            tracing::debug!(kinds = ?service.tags, "Refreshed kinds from directory");
        }

        member_record(self.registry.cluster_name(), entry, self.registry.serializer())
    }
}

/// Build the snapshot record for one directory entry.
///
/// A missing or empty status payload yields `None`. So does a malformed one,
/// after logging a warning.
pub fn member_record<S: StatusSerializer>(
    cluster_name: &str,
    entry: &ServiceEntry,
    serializer: &S,
) -> MemberRecord<S::Value> {
    let service = &entry.service;
    let status_value = service
        .meta
        .get(STATUS_META_KEY)
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| match serializer.deserialize(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    service_id = %service.id,
                    "Ignoring malformed status value: {}",
                    e
                );
                None
            }
        });

    MemberRecord {
        member_id: watch_member_id(cluster_name, entry.address(), service.port),
        address: entry.address().to_string(),
        port: service.port,
        kinds: service.tags.clone(),
        status_value,
        alive: entry.is_alive(),
    }
}
