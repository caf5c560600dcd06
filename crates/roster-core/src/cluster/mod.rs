mod directory;
mod member;
mod sink;
mod status;

pub use directory::{
    aggregated_status, go_duration, ttl_check_id, AgentService, CatalogNode, CheckStatus,
    Directory, DirectoryFuture, HealthCheck, QueryOptions, ServiceEntry, ServiceHealth,
    ServiceRegistration, TtlCheck, NODE_MAINTENANCE_CHECK, SERVICE_MAINTENANCE_PREFIX,
    STATUS_META_KEY,
};
pub use member::{join_member_id, watch_member_id, MemberRecord, TopologyDiff, TopologySnapshot};
pub use sink::{TopologyEventStream, TopologySink};
pub use status::{JsonStatusSerializer, StatusSerializer, StringStatusSerializer};
