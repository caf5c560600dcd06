use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// Check ID Consul uses for node-wide maintenance mode.
pub const NODE_MAINTENANCE_CHECK: &str = "_node_maintenance";

/// Check ID prefix Consul uses for per-service maintenance mode.
pub const SERVICE_MAINTENANCE_PREFIX: &str = "_service_maintenance:";

/// Meta key carrying the serialized member status.
pub const STATUS_META_KEY: &str = "StatusValue";

/// Boxed future returned by directory calls.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Contract the membership engine needs from the directory service.
///
/// Implementations must bound every call: plain calls by their own request
/// timeout, health queries by the requested wait time.
pub trait Directory: Send + Sync {
    /// Register or overwrite a service instance together with its TTL check.
    fn register_service<'a>(&'a self, registration: &'a ServiceRegistration)
        -> DirectoryFuture<'a, ()>;

    /// Remove a service instance. Removing an absent instance is not an error.
    fn deregister_service<'a>(&'a self, service_id: &'a str) -> DirectoryFuture<'a, ()>;

    /// Renew a TTL check with the given status.
    fn update_ttl<'a>(&'a self, check_id: &'a str, status: CheckStatus)
        -> DirectoryFuture<'a, ()>;

    /// Blocking health query for every instance registered under `service`.
    fn health_service<'a>(
        &'a self,
        service: &'a str,
        options: &'a QueryOptions,
    ) -> DirectoryFuture<'a, ServiceHealth>;

    /// IDs of the service instances registered with the local agent.
    fn local_services(&self) -> DirectoryFuture<'_, Vec<String>>;
}

/// A service instance registration with its TTL health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Meta", skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(rename = "Check")]
    pub check: TtlCheck,
}

impl ServiceRegistration {
    /// ID of the TTL check the directory attaches to this registration.
    pub fn check_id(&self) -> String {
        ttl_check_id(&self.id)
    }
}

/// TTL check descriptor attached to a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TtlCheck {
    #[serde(rename = "TTL", serialize_with = "serialize_go_duration")]
    pub ttl: Duration,
    #[serde(
        rename = "DeregisterCriticalServiceAfter",
        serialize_with = "serialize_go_duration"
    )]
    pub deregister_critical_after: Duration,
}

/// Health check status as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
    #[serde(other)]
    Unknown,
}

impl CheckStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options for a blocking query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Last index seen by the caller. Zero returns immediately.
    pub wait_index: u64,
    /// Upper bound on how long the directory may hold the request.
    pub wait_time: Duration,
}

/// Result of a health query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceHealth {
    pub entries: Vec<ServiceEntry>,
    pub last_index: u64,
}

/// One service instance with its node and checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    #[serde(rename = "Node", default)]
    pub node: Option<CatalogNode>,
    #[serde(rename = "Service")]
    pub service: AgentService,
    #[serde(rename = "Checks", default, deserialize_with = "null_as_default")]
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    /// Advertised address, falling back to the node address when the
    /// service registered without one.
    pub fn address(&self) -> &str {
        if self.service.address.is_empty() {
            if let Some(node) = &self.node {
                return &node.address;
            }
        }
        &self.service.address
    }

    /// True iff there is at least one check and they aggregate to passing.
    pub fn is_alive(&self) -> bool {
        !self.checks.is_empty() && aggregated_status(&self.checks) == CheckStatus::Passing
    }
}

/// The node a service instance lives on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogNode {
    #[serde(rename = "Node", default)]
    pub name: String,
    #[serde(rename = "Address", default)]
    pub address: String,
}

/// A registered service instance as stored by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "Tags", default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "Meta", default, deserialize_with = "null_as_default")]
    pub meta: BTreeMap<String, String>,
}

/// A single health check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: CheckStatus,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
}

/// Aggregate a set of checks the way Consul does.
///
/// Maintenance wins over critical, critical over warning, warning over
/// passing. An unknown status makes the whole aggregate unknown. An empty set
/// aggregates to passing; callers that need "alive" must also require at
/// least one check.
pub fn aggregated_status(checks: &[HealthCheck]) -> CheckStatus {
    let mut warning = false;
    let mut critical = false;
    let mut maintenance = false;

    for check in checks {
        if check.check_id == NODE_MAINTENANCE_CHECK
            || check.check_id.starts_with(SERVICE_MAINTENANCE_PREFIX)
        {
            maintenance = true;
            continue;
        }

        match check.status {
            CheckStatus::Passing => {}
            CheckStatus::Warning => warning = true,
            CheckStatus::Critical => critical = true,
            CheckStatus::Maintenance => maintenance = true,
            CheckStatus::Unknown => return CheckStatus::Unknown,
        }
    }

    if maintenance {
        CheckStatus::Maintenance
    } else if critical {
        CheckStatus::Critical
    } else if warning {
        CheckStatus::Warning
    } else {
        CheckStatus::Passing
    }
}

/// ID of the TTL check attached to a service registration.
pub fn ttl_check_id(service_id: &str) -> String {
    format!("service:{}", service_id)
}

/// Format a duration in Go syntax (`3s`, `1500ms`).
pub fn go_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        format!("{}ns", duration.as_nanos())
    } else if millis % 1000 == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", millis)
    }
}

fn serialize_go_duration<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&go_duration(*duration))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
