pub mod cluster;
pub mod directory;

pub use cluster::{
    member_record, ClusterMembership, HeartbeatConfig, HeartbeatLoop, HeartbeatOutcome,
    JoinRequest, MemberRegistry, MembershipConfig, MembershipState, TopologyWatcher, WatchConfig,
};
pub use directory::ConsulDirectory;
