use tokio::sync::broadcast;

use super::member::TopologySnapshot;

/// Destination for topology snapshots.
///
/// Publishing is fire-and-forget. Implementations must deliver snapshots in
/// the order they were published.
pub trait TopologySink<V>: Send + Sync {
    fn publish(&self, snapshot: TopologySnapshot<V>);
}

/// Broadcast event stream for topology snapshots.
///
/// Snapshots reach whoever is subscribed at publish time.
pub struct TopologyEventStream<V> {
    tx: broadcast::Sender<TopologySnapshot<V>>,
}

impl<V: Clone + Send + Sync + 'static> TopologyEventStream<V> {
    /// Create a new stream buffering up to `capacity` snapshots per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to snapshots published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TopologySnapshot<V>> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TopologyEventStream<V> {
    fn default() -> Self {
        Self::new(64)
    }
}

impl<V: Clone + Send + Sync + 'static> TopologySink<V> for TopologyEventStream<V> {
    fn publish(&self, snapshot: TopologySnapshot<V>) {
        // No subscribers is not an error.
        let _ = self.tx.send(snapshot);
    }
}
