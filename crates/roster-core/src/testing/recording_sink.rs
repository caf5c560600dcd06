use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use crate::cluster::{TopologySink, TopologySnapshot};

/// Topology sink that keeps every snapshot it receives.
pub struct RecordingSink<V> {
    snapshots: Mutex<Vec<TopologySnapshot<V>>>,
    count_tx: watch::Sender<usize>,
}

impl<V: Clone> RecordingSink<V> {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            snapshots: Mutex::new(Vec::new()),
            count_tx,
        }
    }

    /// All snapshots published so far, oldest first.
    pub fn snapshots(&self) -> Vec<TopologySnapshot<V>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent snapshot.
    pub fn last(&self) -> Option<TopologySnapshot<V>> {
        self.snapshots.lock().unwrap().last().cloned()
    }

    /// Wait until at least `count` snapshots were published.
    ///
    /// Returns `false` if the timeout elapses first.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.count_tx.subscribe();
        let reached = async move {
            loop {
                let current = *rx.borrow_and_update();
                if current >= count {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }
}

impl<V: Clone> Default for RecordingSink<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> TopologySink<V> for RecordingSink<V> {
    fn publish(&self, snapshot: TopologySnapshot<V>) {
        let count = {
            let mut snapshots = self.snapshots.lock().unwrap();
            snapshots.push(snapshot);
            snapshots.len()
        };
        self.count_tx.send_replace(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let sink = RecordingSink::<String>::new();
        sink.publish(TopologySnapshot::new(Vec::new(), 3));
        sink.publish(TopologySnapshot::new(Vec::new(), 7));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.last().unwrap().index, 7);
        assert!(sink.wait_for_count(2, Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let sink = RecordingSink::<String>::new();
        assert!(!sink.wait_for_count(1, Duration::from_secs(1)).await);
    }
}
