use std::sync::Arc;

use roster_core::cluster::{
    Directory, QueryOptions, StatusSerializer, TopologySink, TopologySnapshot,
};
use roster_core::config::RosterConfig;
use roster_core::Result;
use roster_runtime::{
    member_record, ClusterMembership, ConsulDirectory, JoinRequest, MembershipConfig,
};

/// A configured node, ready to join its cluster.
pub struct RosterNode {
    config: RosterConfig,
    directory: Arc<dyn Directory>,
}

impl RosterNode {
    /// Create a node talking to the Consul agent named in `config`.
    pub fn from_config(config: RosterConfig) -> Result<Self> {
        config.validate()?;
        let directory = Arc::new(ConsulDirectory::new(&config.directory)?);
        Ok(Self { config, directory })
    }

    /// Create a node on top of a custom directory.
    pub fn with_directory(config: RosterConfig, directory: Arc<dyn Directory>) -> Self {
        Self { config, directory }
    }

    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    pub fn directory(&self) -> Arc<dyn Directory> {
        self.directory.clone()
    }

    /// Join request built from the `[cluster]` and `[node]` sections.
    pub fn join_request<V>(&self, status: Option<V>) -> JoinRequest<V> {
        let mut request = JoinRequest::new(
            self.config.cluster.name.clone(),
            self.config.node.address.clone(),
            self.config.node.port,
        )
        .with_kinds(self.config.node.kinds.iter().cloned());
        request.status = status;
        request
    }

    /// Join the cluster, publishing topology snapshots to `sink`.
    pub async fn join<S: StatusSerializer>(
        &self,
        sink: Arc<dyn TopologySink<S::Value>>,
        serializer: S,
        status: Option<S::Value>,
    ) -> Result<ClusterMembership<S>> {
        ClusterMembership::join(
            self.directory.clone(),
            sink,
            serializer,
            self.join_request(status),
            MembershipConfig::from(&self.config.cluster),
        )
        .await
    }

    /// Read the current membership once, without joining.
    pub async fn members<S: StatusSerializer>(
        &self,
        serializer: &S,
    ) -> Result<TopologySnapshot<S::Value>> {
        let cluster = &self.config.cluster.name;
        let health = self
            .directory
            .health_service(cluster, &QueryOptions::default())
            .await?;

        let records = health
            .entries
            .iter()
            .map(|entry| member_record(cluster, entry, serializer));
        Ok(TopologySnapshot::new(records, health.last_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::cluster::{JsonStatusSerializer, StringStatusSerializer};
    use roster_core::testing::{MockDirectory, RecordingSink};

    fn config() -> RosterConfig {
        RosterConfig::parse_toml(
            r#"
                [cluster]
                name = "orders"

                [node]
                address = "10.0.0.7"
                port = 4100
                kinds = ["cart"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_join_request_from_config() {
        let node = RosterNode::with_directory(config(), Arc::new(MockDirectory::new()));
        let request = node.join_request(Some("ready".to_string()));

        assert_eq!(request.cluster_name, "orders");
        assert_eq!(request.address, "10.0.0.7");
        assert_eq!(request.port, 4100);
        assert_eq!(request.kinds, vec!["cart"]);
        assert_eq!(request.status.as_deref(), Some("ready"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_members_reads_without_registering() {
        let directory = Arc::new(MockDirectory::new());
        let node = RosterNode::with_directory(config(), directory.clone());
        let sink = Arc::new(RecordingSink::<serde_json::Value>::new());
        let membership = node
            .join(sink, JsonStatusSerializer::<serde_json::Value>::new(), None)
            .await
            .unwrap();

        let observer = RosterNode::with_directory(config(), directory.clone());
        let snapshot = observer.members(&StringStatusSerializer).await.unwrap();

        assert_eq!(snapshot.member_ids(), vec!["orders/10.0.0.7:4100"]);
        assert!(snapshot.members[0].alive);
        assert_eq!(snapshot.members[0].status_value, None);
        assert_eq!(directory.registrations().len(), 1);

        membership.leave().await.unwrap();
        let snapshot = observer.members(&StringStatusSerializer).await.unwrap();
        assert!(snapshot.is_empty());
    }
}
