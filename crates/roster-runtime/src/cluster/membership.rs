use std::sync::Arc;
use std::time::Duration;

use roster_core::cluster::{Directory, StatusSerializer, TopologySink, TtlCheck};
use roster_core::config::ClusterConfig;
use roster_core::{Result, RosterError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::heartbeat::{HeartbeatConfig, HeartbeatLoop};
use super::registry::MemberRegistry;
use super::state::MembershipState;
use super::watcher::{TopologyWatcher, WatchConfig};

/// Timing configuration for a cluster membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConfig {
    /// TTL of the health check.
    pub ttl: Duration,
    /// Interval between TTL renewals.
    pub refresh_interval: Duration,
    /// Grace period before the directory evicts a critical member.
    pub deregister_critical_after: Duration,
    /// Upper bound for a blocking topology query.
    pub wait_time: Duration,
    /// First delay after a failed topology query.
    pub watch_retry_initial: Duration,
    /// Cap for the topology retry delay.
    pub watch_retry_max: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

impl From<&ClusterConfig> for MembershipConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            ttl: config.ttl(),
            refresh_interval: config.refresh_ttl(),
            deregister_critical_after: config.deregister_critical(),
            wait_time: config.blocking_wait(),
            watch_retry_initial: config.watch_retry_initial(),
            watch_retry_max: config.watch_retry_max(),
        }
    }
}

impl MembershipConfig {
    /// Reject timings the heartbeat or watcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() || self.refresh_interval.is_zero() || self.wait_time.is_zero() {
            return Err(RosterError::Config(
                "membership durations must be greater than zero".into(),
            ));
        }
        if self.refresh_interval >= self.ttl {
            return Err(RosterError::Config(format!(
                "refresh interval {:?} must be shorter than ttl {:?}",
                self.refresh_interval, self.ttl
            )));
        }
        if self.watch_retry_initial > self.watch_retry_max {
            return Err(RosterError::Config(
                "watch retry initial delay must not exceed the maximum".into(),
            ));
        }
        Ok(())
    }

    fn ttl_check(&self) -> TtlCheck {
        TtlCheck {
            ttl: self.ttl,
            deregister_critical_after: self.deregister_critical_after,
        }
    }

    fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            refresh_interval: self.refresh_interval,
        }
    }

    fn watch(&self) -> WatchConfig {
        WatchConfig {
            wait_time: self.wait_time,
            retry_initial: self.watch_retry_initial,
            retry_max: self.watch_retry_max,
        }
    }
}

/// Identity and initial record of a joining member.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest<V> {
    pub cluster_name: String,
    pub address: String,
    pub port: u16,
    pub kinds: Vec<String>,
    pub status: Option<V>,
}

impl<V> JoinRequest<V> {
    pub fn new(cluster_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            address: address.into(),
            port,
            kinds: Vec::new(),
            status: None,
        }
    }

    /// Set the kinds this member can host.
    pub fn with_kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Set the initial status value.
    pub fn with_status(mut self, status: V) -> Self {
        self.status = Some(status);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(RosterError::InvalidArgument(
                "cluster name must not be empty".into(),
            ));
        }
        if self.address.trim().is_empty() {
            return Err(RosterError::InvalidArgument(
                "member address must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Membership of this process in one cluster.
///
/// Created by [`ClusterMembership::join`], which leaves the member registered
/// with a passing TTL and two background tasks running: the heartbeat loop
/// and the topology watcher. [`ClusterMembership::leave`] stops both and
/// removes the registration. The watcher finishes its current blocking query
/// before it exits. Dropping the handle without leaving stops the tasks and
/// lets the directory evict the member once its TTL lapses.
pub struct ClusterMembership<S: StatusSerializer> {
    registry: Arc<MemberRegistry<S>>,
    state: Arc<MembershipState>,
    leave: Mutex<LeaveProgress>,
}

/// How far [`ClusterMembership::leave`] has got.
struct LeaveProgress {
    heartbeat: Option<JoinHandle<()>>,
    finished: bool,
}

impl<S: StatusSerializer> ClusterMembership<S> {
    /// Join a cluster.
    ///
    /// Registers the member, renews its TTL once, and publishes an initial
    /// topology before starting the background tasks. A failed registration
    /// or first renewal fails the join. A failed initial topology fetch is
    /// logged and left to the watcher.
    pub async fn join(
        directory: Arc<dyn Directory>,
        sink: Arc<dyn TopologySink<S::Value>>,
        serializer: S,
        request: JoinRequest<S::Value>,
        config: MembershipConfig,
    ) -> Result<Self> {
        config.validate()?;
        request.validate()?;

        let state = Arc::new(MembershipState::new());
        let registry = Arc::new(MemberRegistry::new(
            directory.clone(),
            Arc::new(serializer),
            state.clone(),
            request,
            config.ttl_check(),
        ));

        registry.register().await?;

        if let Err(e) = registry.renew_ttl().await {
            tracing::warn!(
                member_id = %registry.service_id(),
                "Initial TTL renewal failed, abandoning join: {}",
                e
            );
            if let Err(de) = registry.deregister().await {
                tracing::warn!("Failed to remove registration after failed join: {}", de);
            }
            return Err(e);
        }

        let mut watcher = TopologyWatcher::new(
            directory,
            registry.clone(),
            sink,
            state.clone(),
            config.watch(),
        );
        if let Err(e) = watcher.poll_once().await {
            tracing::warn!("Initial topology fetch failed: {}", e);
        }

        let heartbeat = HeartbeatLoop::new(registry.clone(), state.clone(), config.heartbeat());
        let heartbeat = tokio::spawn(heartbeat.run());
        tokio::spawn(watcher.run());

        tracing::info!(
            member_id = %registry.service_id(),
            cluster = %registry.cluster_name(),
            kinds = ?registry.known_kinds(),
            "Joined cluster"
        );

        Ok(Self {
            registry,
            state,
            leave: Mutex::new(LeaveProgress {
                heartbeat: Some(heartbeat),
                finished: false,
            }),
        })
    }

    /// Leave the cluster.
    ///
    /// Stops the heartbeat, waits for it to finish, then deregisters. Once a
    /// call has run to completion, calling it again is a no-op. A call that
    /// was cancelled part way is resumed by the next one. Fails only if the
    /// deregistration fails, in which case [`ClusterMembership::deregister`]
    /// can retry it.
    pub async fn leave(&self) -> Result<()> {
        if self.state.request_shutdown() {
            tracing::info!(member_id = %self.registry.service_id(), "Leaving cluster");
        }

        let mut progress = self.leave.lock().await;
        if progress.finished {
            return Ok(());
        }

        // The handle is dropped only after it resolves.
        if let Some(handle) = progress.heartbeat.as_mut() {
            if let Err(e) = handle.await {
                tracing::warn!("Heartbeat task ended abnormally: {}", e);
            }
        }
        progress.heartbeat = None;

        let result = if self.state.is_deregistered() {
            Ok(())
        } else {
            self.registry.deregister().await
        };
        progress.finished = true;
        result
    }

    /// Advertise a new status value. `None` is a no-op.
    pub async fn update_status(&self, value: Option<S::Value>) -> Result<()> {
        self.registry.update_status(value).await
    }

    /// Outcome of the most recent heartbeat.
    pub fn health_status(&self) -> Result<()> {
        match self.state.last_heartbeat_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove the registration, for example to retry a failed leave.
    pub async fn deregister(&self) -> Result<()> {
        self.registry.deregister().await
    }

    /// Directory service ID of this member.
    pub fn member_id(&self) -> &str {
        self.registry.service_id()
    }

    pub fn known_kinds(&self) -> Vec<String> {
        self.registry.known_kinds()
    }

    pub fn status_value(&self) -> Option<S::Value> {
        self.registry.status_value()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.is_shutdown()
    }
}

impl<S: StatusSerializer> Drop for ClusterMembership<S> {
    fn drop(&mut self) {
        self.state.request_shutdown();
    }
}
