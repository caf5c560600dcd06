mod heartbeat;
mod membership;
mod registry;
mod state;
mod watcher;

pub use heartbeat::{HeartbeatConfig, HeartbeatLoop, HeartbeatOutcome};
pub use membership::{ClusterMembership, JoinRequest, MembershipConfig};
pub use registry::MemberRegistry;
pub use state::MembershipState;
pub use watcher::{member_record, TopologyWatcher, WatchConfig};
