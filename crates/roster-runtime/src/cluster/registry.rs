use std::collections::BTreeMap;
use std::sync::Arc;

use roster_core::cluster::{
    join_member_id, ttl_check_id, CheckStatus, Directory, ServiceRegistration, StatusSerializer,
    TtlCheck, STATUS_META_KEY,
};
use roster_core::{Result, RosterError};
use tokio::sync::{watch, Mutex};

use super::membership::JoinRequest;
use super::state::MembershipState;

/// Registers this process with the directory and keeps its record current.
pub struct MemberRegistry<S: StatusSerializer> {
    directory: Arc<dyn Directory>,
    serializer: Arc<S>,
    state: Arc<MembershipState>,
    cluster_name: String,
    address: String,
    port: u16,
    service_id: String,
    check_id: String,
    check: TtlCheck,
    kinds: watch::Sender<Vec<String>>,
    status: watch::Sender<Option<S::Value>>,
    /// Held across every write of the record so the final deregistration
    /// cannot be overtaken by a registration already in flight.
    writes: Mutex<()>,
}

impl<S: StatusSerializer> MemberRegistry<S> {
    /// Create a registry for the member described by `request`.
    pub fn new(
        directory: Arc<dyn Directory>,
        serializer: Arc<S>,
        state: Arc<MembershipState>,
        request: JoinRequest<S::Value>,
        check: TtlCheck,
    ) -> Self {
        let service_id = join_member_id(&request.cluster_name, &request.address, request.port);
        let check_id = ttl_check_id(&service_id);
        let (kinds, _) = watch::channel(request.kinds);
        let (status, _) = watch::channel(request.status);

        Self {
            directory,
            serializer,
            state,
            cluster_name: request.cluster_name,
            address: request.address,
            port: request.port,
            service_id,
            check_id,
            check,
            kinds,
            status,
            writes: Mutex::new(()),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Directory service ID of this member.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Kinds as last registered or refreshed from the directory.
    pub fn known_kinds(&self) -> Vec<String> {
        self.kinds.borrow().clone()
    }

    /// Subscribe to kind changes.
    pub fn kinds_receiver(&self) -> watch::Receiver<Vec<String>> {
        self.kinds.subscribe()
    }

    /// Replace the cached kinds with the directory's copy.
    ///
    /// Returns `true` if the cached kinds changed.
    pub fn refresh_kinds(&self, kinds: &[String]) -> bool {
        self.kinds.send_if_modified(|current| {
            if current.as_slice() == kinds {
                return false;
            }
            *current = kinds.to_vec();
            true
        })
    }

    /// Status value this member currently advertises.
    pub fn status_value(&self) -> Option<S::Value> {
        self.status.borrow().clone()
    }

    /// Submit this member's record, overwriting any previous one.
    pub async fn register(&self) -> Result<()> {
        let _writes = self.writes.lock().await;
        let registration = {
            let status = self.status.borrow();
            self.build_registration(status.as_ref())?
        };
        self.directory.register_service(&registration).await?;

        tracing::debug!(
            member_id = %self.service_id,
            kinds = ?registration.tags,
            "Registered member"
        );
        Ok(())
    }

    /// Remove this member's record from the directory.
    pub async fn deregister(&self) -> Result<()> {
        let _writes = self.writes.lock().await;
        self.directory.deregister_service(&self.service_id).await?;
        self.state.mark_deregistered();

        tracing::info!(member_id = %self.service_id, "Deregistered member");
        Ok(())
    }

    /// Advertise a new status value.
    ///
    /// `None` keeps the current value and touches nothing. Fails with
    /// [`RosterError::ShuttingDown`] once shutdown has been requested. An
    /// update that passed the shutdown check completes before any
    /// deregistration starts.
    pub async fn update_status(&self, value: Option<S::Value>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        let _writes = self.writes.lock().await;
        if self.state.is_shutdown() {
            return Err(RosterError::ShuttingDown);
        }

        let registration = self.build_registration(Some(&value))?;
        self.status.send_replace(Some(value));
        self.directory.register_service(&registration).await?;

        tracing::debug!(member_id = %self.service_id, "Updated member status");
        Ok(())
    }

    /// Mark the TTL check as passing.
    pub async fn renew_ttl(&self) -> Result<()> {
        self.directory
            .update_ttl(&self.check_id, CheckStatus::Passing)
            .await
    }

    /// Whether the local agent still lists this member.
    pub async fn is_listed(&self) -> Result<bool> {
        let services = self.directory.local_services().await?;
        Ok(services.iter().any(|id| id == &self.service_id))
    }

    fn build_registration(&self, status: Option<&S::Value>) -> Result<ServiceRegistration> {
        let mut meta = BTreeMap::new();
        if let Some(value) = status {
            meta.insert(
                STATUS_META_KEY.to_string(),
                self.serializer.serialize(value)?,
            );
        }

        Ok(ServiceRegistration {
            id: self.service_id.clone(),
            name: self.cluster_name.clone(),
            tags: self.known_kinds(),
            address: self.address.clone(),
            port: self.port,
            meta,
            check: self.check,
        })
    }
}
