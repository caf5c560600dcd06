use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use roster_core::RosterError;
use tokio::sync::watch;

/// Flags shared by the lifecycle controller and the background tasks of one
/// joined membership.
///
/// `shutdown` and `deregistered` only ever go from `false` to `true`.
pub struct MembershipState {
    shutdown: AtomicBool,
    deregistered: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    heartbeat_error: watch::Sender<Option<RosterError>>,
}

impl MembershipState {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (heartbeat_error, _) = watch::channel(None);
        Self {
            shutdown: AtomicBool::new(false),
            deregistered: AtomicBool::new(false),
            shutdown_tx,
            heartbeat_error,
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Raise the shutdown flag and wake sleeping tasks.
    ///
    /// Returns `true` only for the call that raised it.
    pub fn request_shutdown(&self) -> bool {
        let already = self.shutdown.swap(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);
        !already
    }

    pub fn is_deregistered(&self) -> bool {
        self.deregistered.load(Ordering::SeqCst)
    }

    pub fn mark_deregistered(&self) {
        self.deregistered.store(true, Ordering::SeqCst);
    }

    /// Most recent heartbeat failure, cleared by the next success.
    pub fn last_heartbeat_error(&self) -> Option<RosterError> {
        self.heartbeat_error.borrow().clone()
    }

    pub fn set_heartbeat_error(&self, error: Option<RosterError>) {
        self.heartbeat_error.send_replace(error);
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        loop {
            let stopped = *rx.borrow_and_update();
            if stopped || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when woken by shutdown.
    pub async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.wait_for_shutdown() => true,
        }
    }
}

impl Default for MembershipState {
    fn default() -> Self {
        Self::new()
    }
}
