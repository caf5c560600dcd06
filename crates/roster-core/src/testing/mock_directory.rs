//! In-memory directory service for testing.
//!
//! Mimics the parts of a Consul agent the membership engine relies on:
//! TTL checks that go critical without renewal, eviction after the
//! deregister-after-critical grace period, and blocking health queries keyed
//! on a change index.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::cluster::{
    ttl_check_id, AgentService, CatalogNode, CheckStatus, Directory, DirectoryFuture,
    HealthCheck, QueryOptions, ServiceEntry, ServiceHealth, ServiceRegistration,
};
use crate::error::{Result, RosterError};

/// A call made against the mock directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    Register(String),
    Deregister(String),
    UpdateTtl(String),
    HealthService(String),
    LocalServices,
}

struct MockService {
    registration: ServiceRegistration,
    status: CheckStatus,
    has_checks: bool,
    last_renewed: Instant,
    critical_since: Option<Instant>,
}

#[derive(Default)]
struct Faults {
    register: usize,
    deregister: usize,
    update_ttl: usize,
    health: usize,
    local_services: usize,
}

fn take_fault(counter: &mut usize, what: &str) -> Result<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(RosterError::Directory(format!("injected {} failure", what)));
    }
    Ok(())
}

struct MockState {
    index: u64,
    services: Vec<MockService>,
    calls: Vec<DirectoryCall>,
    registrations: Vec<ServiceRegistration>,
    faults: Faults,
}

/// Mock directory for testing.
///
/// # Example
///
/// ```ignore
/// let directory = Arc::new(MockDirectory::new());
/// let membership = ClusterMembership::join(directory.clone(), ...).await?;
///
/// directory.evict("orders@10.0.0.1:4000");
/// tokio::time::sleep(Duration::from_secs(2)).await;
/// assert_eq!(directory.register_count("orders@10.0.0.1:4000"), 2);
/// ```
pub struct MockDirectory {
    state: Mutex<MockState>,
    index_tx: watch::Sender<u64>,
}

impl MockDirectory {
    /// Create an empty mock directory.
    pub fn new() -> Self {
        let (index_tx, _) = watch::channel(1);
        Self {
            state: Mutex::new(MockState {
                index: 1,
                services: Vec::new(),
                calls: Vec::new(),
                registrations: Vec::new(),
                faults: Faults::default(),
            }),
            index_tx,
        }
    }

    fn bump(&self, state: &mut MockState) {
        state.index += 1;
        self.index_tx.send_replace(state.index);
    }

    /// Apply TTL expiry and eviction as of now.
    fn reap_locked(&self, state: &mut MockState) {
        let now = Instant::now();
        let mut changed = false;

        for service in state.services.iter_mut() {
            let ttl = service.registration.check.ttl;
            if service.status != CheckStatus::Critical && now >= service.last_renewed + ttl {
                service.status = CheckStatus::Critical;
                service.critical_since = Some(service.last_renewed + ttl);
                changed = true;
            }
        }

        let before = state.services.len();
        state.services.retain(|service| match service.critical_since {
            Some(since) => now < since + service.registration.check.deregister_critical_after,
            None => true,
        });
        changed |= state.services.len() != before;

        if changed {
            self.bump(state);
        }
    }

    /// Apply TTL expiry and eviction without making a call.
    pub fn reap(&self) {
        let mut state = self.state.lock().unwrap();
        self.reap_locked(&mut state);
    }

    /// Remove an instance as if the directory dropped it on its own.
    pub fn evict(&self, service_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.services.len();
        state.services.retain(|s| s.registration.id != service_id);
        let removed = state.services.len() != before;
        if removed {
            self.bump(&mut state);
        }
        removed
    }

    /// Overwrite the tags the directory holds for an instance.
    pub fn set_tags(&self, service_id: &str, tags: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        if let Some(service) = state
            .services
            .iter_mut()
            .find(|s| s.registration.id == service_id)
        {
            service.registration.tags = tags;
            self.bump(&mut state);
        }
    }

    /// Force the TTL check status of an instance.
    pub fn set_check_status(&self, service_id: &str, status: CheckStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(service) = state
            .services
            .iter_mut()
            .find(|s| s.registration.id == service_id)
        {
            service.status = status;
            self.bump(&mut state);
        }
    }

    /// Report an instance without any health checks.
    pub fn clear_checks(&self, service_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(service) = state
            .services
            .iter_mut()
            .find(|s| s.registration.id == service_id)
        {
            service.has_checks = false;
            self.bump(&mut state);
        }
    }

    /// Fail the next `n` service registrations.
    pub fn fail_next_registrations(&self, n: usize) {
        self.state.lock().unwrap().faults.register = n;
    }

    /// Fail the next `n` deregistrations.
    pub fn fail_next_deregistrations(&self, n: usize) {
        self.state.lock().unwrap().faults.deregister = n;
    }

    /// Fail the next `n` TTL renewals.
    pub fn fail_next_ttl_updates(&self, n: usize) {
        self.state.lock().unwrap().faults.update_ttl = n;
    }

    /// Fail the next `n` health queries.
    pub fn fail_next_health_queries(&self, n: usize) {
        self.state.lock().unwrap().faults.health = n;
    }

    /// Fail the next `n` local service listings.
    pub fn fail_next_local_service_listings(&self, n: usize) {
        self.state.lock().unwrap().faults.local_services = n;
    }

    /// Current change index.
    pub fn index(&self) -> u64 {
        self.state.lock().unwrap().index
    }

    /// Whether an instance is registered.
    pub fn contains(&self, service_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .services
            .iter()
            .any(|s| s.registration.id == service_id)
    }

    /// TTL check status of an instance.
    pub fn check_status(&self, service_id: &str) -> Option<CheckStatus> {
        self.state
            .lock()
            .unwrap()
            .services
            .iter()
            .find(|s| s.registration.id == service_id)
            .map(|s| s.status)
    }

    /// Registration currently held for an instance.
    pub fn service(&self, service_id: &str) -> Option<ServiceRegistration> {
        self.state
            .lock()
            .unwrap()
            .services
            .iter()
            .find(|s| s.registration.id == service_id)
            .map(|s| s.registration.clone())
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Every registration payload received, in order.
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.state.lock().unwrap().registrations.clone()
    }

    /// Number of registration calls for an instance.
    pub fn register_count(&self, service_id: &str) -> usize {
        self.count(|call| matches!(call, DirectoryCall::Register(id) if id == service_id))
    }

    /// Number of TTL renewals for a check.
    pub fn ttl_update_count(&self, check_id: &str) -> usize {
        self.count(|call| matches!(call, DirectoryCall::UpdateTtl(id) if id == check_id))
    }

    /// Number of recorded calls matching a predicate.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&DirectoryCall) -> bool,
    {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    fn health_now(&self, service: &str) -> ServiceHealth {
        let state = self.state.lock().unwrap();
        let entries = state
            .services
            .iter()
            .filter(|s| s.registration.name == service)
            .map(|s| {
                let registration = &s.registration;
                let checks = if s.has_checks {
                    vec![HealthCheck {
                        check_id: registration.check_id(),
                        name: format!("Service '{}' check", registration.name),
                        status: s.status,
                        service_id: registration.id.clone(),
                    }]
                } else {
                    Vec::new()
                };

                ServiceEntry {
                    node: Some(CatalogNode {
                        name: "mock-agent".to_string(),
                        address: "127.0.0.1".to_string(),
                    }),
                    service: AgentService {
                        id: registration.id.clone(),
                        service: registration.name.clone(),
                        tags: registration.tags.clone(),
                        address: registration.address.clone(),
                        port: registration.port,
                        meta: registration.meta.clone(),
                    },
                    checks,
                }
            })
            .collect();

        ServiceHealth {
            entries,
            last_index: state.index,
        }
    }

    async fn wait_for_change(&self, wait_index: u64, wait_time: Duration) {
        let mut rx = self.index_tx.subscribe();
        let changed = async move {
            loop {
                let current = *rx.borrow_and_update();
                if current != wait_index || rx.changed().await.is_err() {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(wait_time, changed).await;
    }
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory for MockDirectory {
    fn register_service<'a>(
        &'a self,
        registration: &'a ServiceRegistration,
    ) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state
                .calls
                .push(DirectoryCall::Register(registration.id.clone()));
            take_fault(&mut state.faults.register, "register")?;
            self.reap_locked(&mut state);
            state.registrations.push(registration.clone());

            let now = Instant::now();
            match state
                .services
                .iter_mut()
                .find(|s| s.registration.id == registration.id)
            {
                Some(existing) => existing.registration = registration.clone(),
                None => state.services.push(MockService {
                    registration: registration.clone(),
                    status: CheckStatus::Critical,
                    has_checks: true,
                    last_renewed: now,
                    critical_since: Some(now),
                }),
            }
            self.bump(&mut state);
            Ok(())
        })
    }

    fn deregister_service<'a>(&'a self, service_id: &'a str) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state
                .calls
                .push(DirectoryCall::Deregister(service_id.to_string()));
            take_fault(&mut state.faults.deregister, "deregister")?;

            let before = state.services.len();
            state.services.retain(|s| s.registration.id != service_id);
            if state.services.len() != before {
                self.bump(&mut state);
            }
            Ok(())
        })
    }

    fn update_ttl<'a>(&'a self, check_id: &'a str, status: CheckStatus) -> DirectoryFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state
                .calls
                .push(DirectoryCall::UpdateTtl(check_id.to_string()));
            take_fault(&mut state.faults.update_ttl, "update_ttl")?;
            self.reap_locked(&mut state);

            let now = Instant::now();
            let service = state
                .services
                .iter_mut()
                .find(|s| ttl_check_id(&s.registration.id) == check_id)
                .ok_or_else(|| {
                    RosterError::Directory(format!(
                        "CheckID \"{}\" does not have associated TTL",
                        check_id
                    ))
                })?;

            service.last_renewed = now;
            service.critical_since = match status {
                CheckStatus::Critical => Some(now),
                _ => None,
            };
            let changed = service.status != status;
            service.status = status;
            if changed {
                self.bump(&mut state);
            }
            Ok(())
        })
    }

    fn health_service<'a>(
        &'a self,
        service: &'a str,
        options: &'a QueryOptions,
    ) -> DirectoryFuture<'a, ServiceHealth> {
        Box::pin(async move {
            let current = {
                let mut state = self.state.lock().unwrap();
                state
                    .calls
                    .push(DirectoryCall::HealthService(service.to_string()));
                take_fault(&mut state.faults.health, "health")?;
                self.reap_locked(&mut state);
                state.index
            };

            if options.wait_index != 0 && options.wait_index == current {
                self.wait_for_change(options.wait_index, options.wait_time)
                    .await;
            }

            Ok(self.health_now(service))
        })
    }

    fn local_services(&self) -> DirectoryFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.calls.push(DirectoryCall::LocalServices);
            take_fault(&mut state.faults.local_services, "local_services")?;
            self.reap_locked(&mut state);
            Ok(state
                .services
                .iter()
                .map(|s| s.registration.id.clone())
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::TtlCheck;
    use std::collections::BTreeMap;

    fn registration(port: u16) -> ServiceRegistration {
        ServiceRegistration {
            id: format!("orders@10.0.0.1:{}", port),
            name: "orders".to_string(),
            tags: vec!["cart".to_string()],
            address: "10.0.0.1".to_string(),
            port,
            meta: BTreeMap::new(),
            check: TtlCheck {
                ttl: Duration::from_secs(3),
                deregister_critical_after: Duration::from_secs(60),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrenewed_instance_is_evicted() {
        let directory = MockDirectory::new();
        let reg = registration(4000);
        directory.register_service(&reg).await.unwrap();
        directory
            .update_ttl(&reg.check_id(), CheckStatus::Passing)
            .await
            .unwrap();
        assert_eq!(directory.check_status(&reg.id), Some(CheckStatus::Passing));

        tokio::time::sleep(Duration::from_secs(4)).await;
        directory.reap();
        assert_eq!(directory.check_status(&reg.id), Some(CheckStatus::Critical));

        tokio::time::sleep(Duration::from_secs(60)).await;
        directory.reap();
        assert!(!directory.contains(&reg.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_query_waits_for_change() {
        let directory = std::sync::Arc::new(MockDirectory::new());
        directory.register_service(&registration(4000)).await.unwrap();

        let first = directory
            .health_service("orders", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(first.entries.len(), 1);

        let options = QueryOptions {
            wait_index: first.last_index,
            wait_time: Duration::from_secs(20),
        };

        let started = Instant::now();
        let unchanged = directory.health_service("orders", &options).await.unwrap();
        assert_eq!(unchanged.last_index, first.last_index);
        assert!(started.elapsed() >= Duration::from_secs(20));

        let writer = directory.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            writer.register_service(&registration(4001)).await.unwrap();
        });

        let changed = directory.health_service("orders", &options).await.unwrap();
        assert_eq!(changed.entries.len(), 2);
        assert!(changed.last_index > first.last_index);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let directory = MockDirectory::new();
        directory.fail_next_registrations(1);

        tokio_test::assert_err!(directory.register_service(&registration(4000)).await);
        tokio_test::assert_ok!(directory.register_service(&registration(4000)).await);
        assert_eq!(directory.register_count("orders@10.0.0.1:4000"), 2);
        assert_eq!(directory.registrations().len(), 1);
    }

    #[tokio::test]
    async fn test_update_ttl_for_unknown_check_fails() {
        let directory = MockDirectory::new();
        let err = directory
            .update_ttl("service:missing", CheckStatus::Passing)
            .await
            .unwrap_err();
        assert!(err.is_directory());
    }
}
