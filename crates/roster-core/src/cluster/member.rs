use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Directory service ID of a joining member: `{cluster}@{address}:{port}`.
pub fn join_member_id(cluster_name: &str, address: &str, port: u16) -> String {
    format!("{}@{}:{}", cluster_name, address, port)
}

/// Member ID carried inside topology snapshots: `{cluster}/{address}:{port}`.
pub fn watch_member_id(cluster_name: &str, address: &str, port: u16) -> String {
    format!("{}/{}:{}", cluster_name, address, port)
}

/// One cluster member as seen in a topology snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRecord<V> {
    /// Stable identity of the instance.
    pub member_id: String,
    /// Advertised host.
    pub address: String,
    /// Advertised port.
    pub port: u16,
    /// Role tags the instance can host.
    pub kinds: Vec<String>,
    /// Application status, `None` when the instance reported none.
    pub status_value: Option<V>,
    /// At least one health check exists and all of them pass.
    pub alive: bool,
}

impl<V> MemberRecord<V> {
    /// Check if this member advertises a kind.
    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }
}

/// The complete membership returned by one directory query.
///
/// Snapshots are never deltas. Consumers compare consecutive snapshots to
/// infer joins and departures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopologySnapshot<V> {
    /// Members in directory response order.
    pub members: Vec<MemberRecord<V>>,
    /// Directory index the snapshot was taken at.
    pub index: u64,
    /// When the snapshot was assembled.
    pub observed_at: DateTime<Utc>,
}

impl<V> TopologySnapshot<V> {
    /// Build a snapshot from directory records.
    ///
    /// Duplicate member IDs resolve last-wins, keeping the slot of the first
    /// occurrence.
    pub fn new(records: impl IntoIterator<Item = MemberRecord<V>>, index: u64) -> Self {
        let mut members: Vec<MemberRecord<V>> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for record in records {
            match slots.get(&record.member_id) {
                Some(&slot) => members[slot] = record,
                None => {
                    slots.insert(record.member_id.clone(), members.len());
                    members.push(record);
                }
            }
        }

        Self {
            members,
            index,
            observed_at: Utc::now(),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the snapshot has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Look up a member by ID.
    pub fn get(&self, member_id: &str) -> Option<&MemberRecord<V>> {
        self.members.iter().find(|m| m.member_id == member_id)
    }

    /// Whether a member ID is part of the snapshot.
    pub fn contains(&self, member_id: &str) -> bool {
        self.get(member_id).is_some()
    }

    /// Members whose checks are passing.
    pub fn alive_members(&self) -> impl Iterator<Item = &MemberRecord<V>> {
        self.members.iter().filter(|m| m.alive)
    }

    /// Alive members that can host a kind.
    pub fn members_with_kind<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = &'a MemberRecord<V>> + 'a {
        self.alive_members().filter(move |m| m.has_kind(kind))
    }

    /// Member IDs in snapshot order.
    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.member_id.as_str()).collect()
    }
}

impl<V: PartialEq> TopologySnapshot<V> {
    /// Compare against the previous snapshot.
    pub fn diff(&self, previous: &TopologySnapshot<V>) -> TopologyDiff {
        let before: HashSet<&str> = previous.members.iter().map(|m| m.member_id.as_str()).collect();
        let after: HashSet<&str> = self.members.iter().map(|m| m.member_id.as_str()).collect();

        let joined = self
            .members
            .iter()
            .filter(|m| !before.contains(m.member_id.as_str()))
            .map(|m| m.member_id.clone())
            .collect();

        let left = previous
            .members
            .iter()
            .filter(|m| !after.contains(m.member_id.as_str()))
            .map(|m| m.member_id.clone())
            .collect();

        let updated = self
            .members
            .iter()
            .filter(|m| matches!(previous.get(&m.member_id), Some(old) if old != *m))
            .map(|m| m.member_id.clone())
            .collect();

        TopologyDiff {
            joined,
            left,
            updated,
        }
    }
}

/// Membership changes between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopologyDiff {
    /// Present now, absent before.
    pub joined: Vec<String>,
    /// Present before, absent now.
    pub left: Vec<String>,
    /// Present in both with a different record.
    pub updated: Vec<String>,
}

impl TopologyDiff {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty() && self.updated.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(port: u16, alive: bool, kinds: &[&str]) -> MemberRecord<String> {
        MemberRecord {
            member_id: watch_member_id("orders", "10.0.0.1", port),
            address: "10.0.0.1".to_string(),
            port,
            kinds: kinds.iter().map(|k| k.to_string()).collect(),
            status_value: None,
            alive,
        }
    }

    #[test]
    fn test_member_id_formats() {
        assert_eq!(join_member_id("orders", "10.0.0.1", 4000), "orders@10.0.0.1:4000");
        assert_eq!(watch_member_id("orders", "10.0.0.1", 4000), "orders/10.0.0.1:4000");
    }

    #[test]
    fn test_duplicate_ids_last_wins() {
        let snapshot = TopologySnapshot::new(
            vec![
                record(4000, false, &["a"]),
                record(4001, true, &["a"]),
                record(4000, true, &["b"]),
            ],
            7,
        );

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.members[0].port, 4000);
        assert!(snapshot.members[0].alive);
        assert_eq!(snapshot.members[0].kinds, vec!["b".to_string()]);
        assert_eq!(snapshot.index, 7);
    }

    #[test]
    fn test_members_with_kind_skips_dead() {
        let snapshot = TopologySnapshot::new(
            vec![
                record(4000, true, &["cart"]),
                record(4001, false, &["cart"]),
                record(4002, true, &["billing"]),
            ],
            1,
        );

        let hosts: Vec<u16> = snapshot.members_with_kind("cart").map(|m| m.port).collect();
        assert_eq!(hosts, vec![4000]);
        assert_eq!(snapshot.alive_members().count(), 2);
    }

    #[test]
    fn test_diff_detects_join_leave_update() {
        let previous = TopologySnapshot::new(
            vec![record(4000, true, &["a"]), record(4001, true, &["a"])],
            1,
        );
        let current = TopologySnapshot::new(
            vec![record(4000, false, &["a"]), record(4002, true, &["a"])],
            2,
        );

        let diff = current.diff(&previous);
        assert_eq!(diff.joined, vec!["orders/10.0.0.1:4002".to_string()]);
        assert_eq!(diff.left, vec!["orders/10.0.0.1:4001".to_string()]);
        assert_eq!(diff.updated, vec!["orders/10.0.0.1:4000".to_string()]);

        assert!(current.diff(&current).is_empty());
    }
}
