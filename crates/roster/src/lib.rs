//! roster - cluster membership over a service directory
//!
//! A node joins a logical cluster by registering itself with a Consul agent,
//! keeps a TTL health check passing, and receives the cluster's membership as
//! a stream of complete topology snapshots.

mod node;

#[doc(hidden)]
pub use roster_core;
#[doc(hidden)]
pub use roster_runtime;

pub use node::RosterNode;

pub mod prelude {
    pub use roster_core::cluster::{
        CheckStatus, Directory, JsonStatusSerializer, MemberRecord, StatusSerializer,
        StringStatusSerializer, TopologyDiff, TopologyEventStream, TopologySink,
        TopologySnapshot,
    };
    pub use roster_core::config::RosterConfig;
    pub use roster_core::error::{Result, RosterError};
    pub use roster_runtime::{ClusterMembership, ConsulDirectory, JoinRequest, MembershipConfig};

    pub use crate::RosterNode;
}
