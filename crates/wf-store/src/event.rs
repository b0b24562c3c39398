use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A node's view of logical time across writers: incremented on the owning
/// node's own append, elementwise-maxed on merge with another clock.
pub type VectorClock = BTreeMap<String, u64>;

pub fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Immutable record appended to an actor's log. `version` is gap-free and
/// ascending within a fixed `actor_id`, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub event_id: String,
	pub actor_id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	pub payload: serde_json::Value,
	pub version: u64,
	pub timestamp: i64,
	pub causal_dependencies: Vec<String>,
	pub vector_clock: VectorClock,
}

/// A point-in-time fold of an actor's events, used to bound replay cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
	pub actor_id: String,
	pub state: serde_json::Value,
	pub version: u64,
	pub last_event_id: String,
	pub timestamp: i64,
	pub checksum: String,
}

/// Deterministic checksum over the canonical encoding of `state`. `serde_json::Value`
/// objects are backed by a `BTreeMap` (the `preserve_order` feature is not enabled
/// anywhere in this workspace), so `to_vec` already yields a fixed field order.
pub fn checksum_of(state: &serde_json::Value) -> String {
	let canonical = serde_json::to_vec(state).expect("serde_json::Value always serializes");
	let mut hasher = std::collections::hash_map::DefaultHasher::new();
	canonical.hash(&mut hasher);
	format!("{:016x}", hasher.finish())
}

/// Merges vector clocks elementwise (the max of each known node's counter).
pub fn merge_vector_clocks(a: &VectorClock, b: &VectorClock) -> VectorClock {
	let mut merged = a.clone();
	for (node, counter) in b {
		let entry = merged.entry(node.clone()).or_insert(0);
		*entry = (*entry).max(*counter);
	}
	merged
}

/// Comparison between two vector clocks, per §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
	Less,
	Greater,
	Equal,
	Concurrent,
}

pub fn compare_vector_clocks(a: &VectorClock, b: &VectorClock) -> ClockOrdering {
	let nodes: std::collections::HashSet<&String> = a.keys().chain(b.keys()).collect();
	let (mut a_less, mut b_less) = (false, false);
	for node in nodes {
		let a_count = a.get(node).copied().unwrap_or(0);
		let b_count = b.get(node).copied().unwrap_or(0);
		match a_count.cmp(&b_count) {
			std::cmp::Ordering::Less => a_less = true,
			std::cmp::Ordering::Greater => b_less = true,
			std::cmp::Ordering::Equal => {},
		}
	}
	match (a_less, b_less) {
		(false, false) => ClockOrdering::Equal,
		(true, false) => ClockOrdering::Less,
		(false, true) => ClockOrdering::Greater,
		(true, true) => ClockOrdering::Concurrent,
	}
}

/// Decides when a new snapshot should be taken and when an existing one is
/// stale enough to warrant an opportunistic rebuild.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
	pub snapshot_interval: u64,
	pub max_snapshot_age_versions: u64,
}

impl Default for SnapshotPolicy {
	fn default() -> Self {
		SnapshotPolicy { snapshot_interval: 100, max_snapshot_age_versions: 1_000 }
	}
}

impl SnapshotPolicy {
	pub fn should_snapshot(&self, current_version: u64, last_snapshot_version: u64) -> bool {
		current_version.saturating_sub(last_snapshot_version) >= self.snapshot_interval
	}

	pub fn needs_rebuild(&self, current_version: u64, last_snapshot_version: u64) -> bool {
		current_version.saturating_sub(last_snapshot_version) > self.max_snapshot_age_versions
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn checksum_is_deterministic_and_order_insensitive() {
		let a = serde_json::json!({"b": 1, "a": 2});
		let b = serde_json::json!({"a": 2, "b": 1});
		assert_eq!(checksum_of(&a), checksum_of(&b));
	}

	#[test]
	fn vector_clock_comparison() {
		let mut a = VectorClock::new();
		a.insert("n1".into(), 2);
		let mut b = VectorClock::new();
		b.insert("n1".into(), 1);
		assert_eq!(compare_vector_clocks(&a, &b), ClockOrdering::Greater);
		assert_eq!(compare_vector_clocks(&b, &a), ClockOrdering::Less);
		assert_eq!(compare_vector_clocks(&a, &a), ClockOrdering::Equal);

		let mut c = VectorClock::new();
		c.insert("n2".into(), 1);
		assert_eq!(compare_vector_clocks(&a, &c), ClockOrdering::Concurrent);
	}

	#[test]
	fn snapshot_policy_thresholds() {
		let policy = SnapshotPolicy::default();
		assert!(!policy.should_snapshot(50, 0));
		assert!(policy.should_snapshot(100, 0));
		assert!(!policy.needs_rebuild(500, 0));
		assert!(policy.needs_rebuild(1_500, 0));
	}
}
