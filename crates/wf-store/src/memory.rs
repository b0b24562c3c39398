use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use wf_common::new_quid;

use crate::{
	error::{StoreError, StoreResult},
	event::{merge_vector_clocks, now_millis, Event, Snapshot, VectorClock},
	store::EventStore,
};

type ActorKey = (String, String);

/// Reference `EventStore` backed by in-process maps guarded by a single
/// `RwLock` per table. Suitable for tests and single-node deployments; not
/// durable across restarts.
pub struct InMemoryEventStore {
	node_id: String,
	logs: RwLock<HashMap<ActorKey, Vec<Event>>>,
	by_id: RwLock<HashMap<ActorKey, Event>>,
	snapshots: RwLock<HashMap<ActorKey, Snapshot>>,
}

impl InMemoryEventStore {
	pub fn new(node_id: impl Into<String>) -> Self {
		InMemoryEventStore {
			node_id: node_id.into(),
			logs: RwLock::new(HashMap::new()),
			by_id: RwLock::new(HashMap::new()),
			snapshots: RwLock::new(HashMap::new()),
		}
	}

	fn key(tenant_id: &str, actor_id: &str) -> ActorKey {
		(tenant_id.to_string(), actor_id.to_string())
	}
}

#[async_trait]
impl EventStore for InMemoryEventStore {
	async fn append(
		&self,
		tenant_id: &str,
		actor_id: &str,
		event_type: &str,
		payload: serde_json::Value,
		expected_version: u64,
		causal_dependencies: Vec<String>,
	) -> StoreResult<Event> {
		let key = Self::key(tenant_id, actor_id);
		let mut logs = self.logs.write().await;
		let log = logs.entry(key.clone()).or_default();
		let actual_version = log.last().map(|event| event.version).unwrap_or(0);
		if actual_version != expected_version {
			return Err(StoreError::version_conflict(actor_id, expected_version, actual_version));
		}

		let mut vector_clock: VectorClock =
			log.last().map(|event| event.vector_clock.clone()).unwrap_or_default();
		for dep_id in &causal_dependencies {
			if let Some(dep_event) = self.by_id.read().await.get(&(tenant_id.to_string(), dep_id.clone())) {
				vector_clock = merge_vector_clocks(&vector_clock, &dep_event.vector_clock);
			}
		}
		*vector_clock.entry(self.node_id.clone()).or_insert(0) += 1;

		let event = Event {
			event_id: new_quid("evt"),
			actor_id: actor_id.to_string(),
			event_type: event_type.to_string(),
			payload,
			version: expected_version + 1,
			timestamp: now_millis(),
			causal_dependencies,
			vector_clock,
		};

		log.push(event.clone());
		self.by_id.write().await.insert((tenant_id.to_string(), event.event_id.clone()), event.clone());
		Ok(event)
	}

	async fn read(&self, tenant_id: &str, actor_id: &str, since_version: u64) -> StoreResult<Vec<Event>> {
		let key = Self::key(tenant_id, actor_id);
		let logs = self.logs.read().await;
		Ok(logs
			.get(&key)
			.map(|log| log.iter().filter(|event| event.version > since_version).cloned().collect())
			.unwrap_or_default())
	}

	async fn get_by_id(&self, tenant_id: &str, event_id: &str) -> StoreResult<Option<Event>> {
		Ok(self.by_id.read().await.get(&(tenant_id.to_string(), event_id.to_string())).cloned())
	}

	async fn latest_version(&self, tenant_id: &str, actor_id: &str) -> StoreResult<u64> {
		let key = Self::key(tenant_id, actor_id);
		Ok(self.logs.read().await.get(&key).and_then(|log| log.last()).map(|event| event.version).unwrap_or(0))
	}

	async fn put_snapshot(&self, tenant_id: &str, snapshot: Snapshot) -> StoreResult<()> {
		let key = Self::key(tenant_id, &snapshot.actor_id);
		self.snapshots.write().await.insert(key, snapshot);
		Ok(())
	}

	async fn latest_snapshot(&self, tenant_id: &str, actor_id: &str) -> StoreResult<Option<Snapshot>> {
		let key = Self::key(tenant_id, actor_id);
		Ok(self.snapshots.read().await.get(&key).cloned())
	}

	async fn list_actor_ids(&self) -> StoreResult<Vec<(String, String)>> {
		Ok(self.logs.read().await.keys().cloned().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn versions_are_gap_free_and_ascending_per_actor() {
		let store = InMemoryEventStore::new("node-1");
		for n in 0..5u64 {
			let event = store.append("t1", "a1", "tick", serde_json::json!({}), n, vec![]).await.unwrap();
			assert_eq!(event.version, n + 1);
		}
		let events = store.read("t1", "a1", 0).await.unwrap();
		let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
		assert_eq!(versions, vec![1, 2, 3, 4, 5]);
	}

	#[tokio::test]
	async fn stale_expected_version_is_rejected() {
		let store = InMemoryEventStore::new("node-1");
		store.append("t1", "a1", "tick", serde_json::json!({}), 0, vec![]).await.unwrap();
		let err = store.append("t1", "a1", "tick", serde_json::json!({}), 0, vec![]).await.unwrap_err();
		assert_eq!(err.kind(), crate::error::StoreErrorKind::VersionConflict);
	}

	#[tokio::test]
	async fn tenants_cannot_see_each_others_events() {
		let store = InMemoryEventStore::new("node-1");
		store.append("tenant-a", "a1", "tick", serde_json::json!({}), 0, vec![]).await.unwrap();
		let other_tenant_version = store.latest_version("tenant-b", "a1").await.unwrap();
		assert_eq!(other_tenant_version, 0);
		let events = store.read("tenant-b", "a1", 0).await.unwrap();
		assert!(events.is_empty());
	}

	#[tokio::test]
	async fn own_node_counter_increments_on_each_append() {
		let store = InMemoryEventStore::new("node-1");
		let e1 = store.append("t1", "a1", "tick", serde_json::json!({}), 0, vec![]).await.unwrap();
		let e2 = store.append("t1", "a1", "tick", serde_json::json!({}), 1, vec![]).await.unwrap();
		assert_eq!(e1.vector_clock.get("node-1"), Some(&1));
		assert_eq!(e2.vector_clock.get("node-1"), Some(&2));
	}

	#[tokio::test]
	async fn list_actor_ids_covers_every_stream() {
		let store = InMemoryEventStore::new("node-1");
		store.append("t1", "a1", "tick", serde_json::json!({}), 0, vec![]).await.unwrap();
		store.append("t1", "a2", "tick", serde_json::json!({}), 0, vec![]).await.unwrap();
		store.append("t2", "a1", "tick", serde_json::json!({}), 0, vec![]).await.unwrap();
		let mut ids = store.list_actor_ids().await.unwrap();
		ids.sort();
		assert_eq!(
			ids,
			vec![
				("t1".to_string(), "a1".to_string()),
				("t1".to_string(), "a2".to_string()),
				("t2".to_string(), "a1".to_string()),
			]
		);
	}

	#[tokio::test]
	async fn snapshot_round_trips() {
		let store = InMemoryEventStore::new("node-1");
		assert!(store.latest_snapshot("t1", "a1").await.unwrap().is_none());
		let snapshot = Snapshot {
			actor_id: "a1".to_string(),
			state: serde_json::json!({"count": 3}),
			version: 3,
			last_event_id: "evt-1".to_string(),
			timestamp: now_millis(),
			checksum: crate::event::checksum_of(&serde_json::json!({"count": 3})),
		};
		store.put_snapshot("t1", snapshot.clone()).await.unwrap();
		let loaded = store.latest_snapshot("t1", "a1").await.unwrap().unwrap();
		assert_eq!(loaded.version, 3);
		assert_eq!(loaded.checksum, snapshot.checksum);
	}
}
