use std::sync::Arc;
use std::time::Duration;

use roster_core::cluster::StatusSerializer;

use super::registry::MemberRegistry;
use super::state::MembershipState;

/// Heartbeat loop configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between TTL renewals. Must be shorter than the TTL.
    pub refresh_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
        }
    }
}

/// What a single heartbeat did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The TTL was renewed.
    Renewed,
    /// Renewal failed but the agent still lists this member.
    StillRegistered,
    /// Renewal failed, the member was missing and got registered again.
    Reregistered,
    /// Renewal failed and the repair registration failed too.
    ReregisterFailed,
}

/// Keeps this member's TTL check passing and repairs the registration when
/// the directory loses it.
pub struct HeartbeatLoop<S: StatusSerializer> {
    registry: Arc<MemberRegistry<S>>,
    state: Arc<MembershipState>,
    config: HeartbeatConfig,
}

impl<S: StatusSerializer> HeartbeatLoop<S> {
    /// Create a new heartbeat loop.
    pub fn new(
        registry: Arc<MemberRegistry<S>>,
        state: Arc<MembershipState>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            state,
            config,
        }
    }

    /// Renew the TTL once, repairing the registration if it is gone.
    pub async fn beat(&self) -> HeartbeatOutcome {
        let error = match self.registry.renew_ttl().await {
            Ok(()) => {
                self.state.set_heartbeat_error(None);
                return HeartbeatOutcome::Renewed;
            }
            Err(e) => e,
        };

        tracing::warn!(
            member_id = %self.registry.service_id(),
            error = %error,
            "Failed to renew TTL"
        );
        self.state.set_heartbeat_error(Some(error));

        // A failed listing counts as absent.
        let listed = match self.registry.is_listed().await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!("Failed to list local services: {}", e);
                false
            }
        };
        if listed {
            return HeartbeatOutcome::StillRegistered;
        }

        match self.registry.register().await {
            Ok(()) => {
                tracing::info!(
                    member_id = %self.registry.service_id(),
                    "Member was missing from the directory, registered again"
                );
                HeartbeatOutcome::Reregistered
            }
            Err(e) => {
                tracing::warn!("Failed to re-register member: {}", e);
                HeartbeatOutcome::ReregisterFailed
            }
        }
    }

    /// Run until shutdown is requested.
    ///
    /// Shutdown is checked before every beat. It cuts the sleep short but
    /// never interrupts a directory call in flight.
    pub async fn run(self) {
        loop {
            if self.state.is_shutdown() {
                break;
            }

            self.beat().await;
            self.state
                .sleep_or_shutdown(self.config.refresh_interval)
                .await;
        }

        tracing::debug!(member_id = %self.registry.service_id(), "Heartbeat loop stopped");
    }
}
