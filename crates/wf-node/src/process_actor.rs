use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use wf_actors::{Actor, ActorContext, ActorExitStatus, Handler, QueueCapacity};
use wf_common::EventBroker;
use wf_engine::{Engine, EngineError, ProcessInstance, Task, TaskKind};
use wf_store::EventStore;

use crate::events::DomainEvent;

/// The single actor instance that drives the process engine. Per §4.1 one
/// actor handles all messages for the resource it owns strictly serially;
/// here the owned resource is the tenant-scoped `Engine` and `EventStore`,
/// which already serialize per-instance mutation behind their own locks
/// (§4.3) — routing every RPC through this actor's mailbox additionally
/// gives at-most-once dispatch and idempotent replay of `correlationId`s
/// without a second, per-instance layer of actors.
pub struct ProcessActor {
	engine: Arc<Engine>,
	store: Arc<dyn EventStore>,
	broker: EventBroker,
	mailbox_capacity: usize,
	idempotency: HashMap<String, serde_json::Value>,
}

impl ProcessActor {
	pub fn new(
		engine: Arc<Engine>,
		store: Arc<dyn EventStore>,
		broker: EventBroker,
		mailbox_capacity: usize,
	) -> Self {
		ProcessActor { engine, store, broker, mailbox_capacity, idempotency: HashMap::new() }
	}

	fn idempotency_key(tenant_id: &str, correlation_id: &Option<String>) -> Option<String> {
		correlation_id.as_ref().map(|id| format!("{tenant_id}:{id}"))
	}

	/// Persists one domain event for `actor_id` and fans it out to realtime
	/// subscribers. A failed append is a real failure: the durability
	/// guarantee in §4.1 depends on every state transition reaching the
	/// `EventStore` before it's considered committed, so callers must not
	/// treat the engine's in-memory mutation as final on its own.
	async fn record(
		&self,
		tenant_id: &str,
		actor_id: &str,
		event_type: &str,
		payload: serde_json::Value,
	) -> Result<(), EngineError> {
		let expected_version = self
			.store
			.latest_version(tenant_id, actor_id)
			.await
			.map_err(|err| EngineError::Persistence(err.to_string()))?;
		let event = self
			.store
			.append(tenant_id, actor_id, event_type, payload, expected_version, Vec::new())
			.await
			.map_err(|err| EngineError::Persistence(err.to_string()))?;
		self.broker.publish(DomainEvent::from_store_event(tenant_id, &event));
		Ok(())
	}

	/// Rebuilds every tenant-scoped process instance from the event log
	/// before the actor starts handling new messages (§4.1's "resume from
	/// last durable version" requirement). One stream failing to replay is
	/// logged and skipped rather than aborting the whole restore — a
	/// corrupted or unregistered-process stream shouldn't take every other
	/// tenant's instances down with it.
	async fn restore_from_store(&self) {
		let actor_ids = match self.store.list_actor_ids().await {
			Ok(ids) => ids,
			Err(err) => {
				tracing::error!(error = %err, "failed to enumerate persisted actors for restore");
				return;
			},
		};
		for (tenant_id, actor_id) in actor_ids {
			let events = match self.store.read(&tenant_id, &actor_id, 0).await {
				Ok(events) => events,
				Err(err) => {
					tracing::error!(%tenant_id, %actor_id, error = %err, "failed to read event log during restore");
					continue;
				},
			};
			for event in events {
				if let Err(err) = self.engine.replay_event(&tenant_id, &actor_id, &event.event_type, &event.payload) {
					tracing::warn!(
						%tenant_id, %actor_id, event_type = %event.event_type, error = %err,
						"failed to replay event during restore"
					);
				}
			}
		}
	}

	/// Completes every currently pending service task once via
	/// [`execute_service_task`], recording the same `task_completed` event a
	/// manual `completeTask` call would (so a restart replays ticked work
	/// identically to explicitly completed work). Newly created service
	/// tasks from this round's advance are left for the next tick, matching
	/// `Engine::tick_service_tasks`'s one-shot semantics.
	async fn tick_pending_service_tasks(&mut self, tenant_id: &str, instance_id: &str) -> EngineResult {
		let instance = self.engine.get_instance(tenant_id, instance_id)?;
		let pending_service: Vec<Task> =
			instance.pending_tasks.iter().filter(|task| task.kind == TaskKind::Service).cloned().collect();
		let outputs: HashMap<String, HashMap<String, serde_json::Value>> =
			pending_service.iter().map(|task| (task.task_id.clone(), execute_service_task(task))).collect();
		let result = self.engine.tick_service_tasks(tenant_id, instance_id, |task| {
			Ok(outputs.get(&task.task_id).cloned().unwrap_or_default())
		})?;
		for task in &pending_service {
			let variables = outputs.get(&task.task_id).cloned().unwrap_or_default();
			self.record(tenant_id, instance_id, "task_completed", serde_json::json!({"taskId": task.task_id, "variables": variables})).await?;
		}
		Ok(result)
	}
}

/// Stand-in for the real service-task integrations `OrderProcess` would call
/// out to; every task succeeds, since this demo process has nothing that can
/// reject a validation or approval.
fn execute_service_task(task: &Task) -> HashMap<String, serde_json::Value> {
	match task.name.as_str() {
		"ValidateOrder" => HashMap::from([("validated".to_string(), serde_json::Value::Bool(true))]),
		"AutoApprove" => HashMap::from([("approved".to_string(), serde_json::Value::Bool(true))]),
		_ => HashMap::new(),
	}
}

#[async_trait]
impl Actor for ProcessActor {
	type ObservableState = ();

	fn observable_state(&self) {}

	fn name(&self) -> String {
		"ProcessActor".to_string()
	}

	fn queue_capacity(&self) -> QueueCapacity {
		QueueCapacity::Bounded(self.mailbox_capacity)
	}

	async fn initialize(&mut self, _ctx: &ActorContext<Self>) -> Result<(), ActorExitStatus> {
		self.restore_from_store().await;
		Ok(())
	}
}

pub type EngineResult = Result<ProcessInstance, EngineError>;
pub type TasksResult = Result<Vec<Task>, EngineError>;

#[derive(Debug, Clone)]
pub struct StartProcess {
	pub tenant_id: String,
	pub process_id: String,
	pub business_key: String,
	pub variables: HashMap<String, serde_json::Value>,
	pub correlation_id: Option<String>,
}

#[async_trait]
impl Handler<StartProcess> for ProcessActor {
	type Reply = EngineResult;

	async fn handle(&mut self, msg: StartProcess, _ctx: &ActorContext<Self>) -> Result<Self::Reply, ActorExitStatus> {
		if let Some(key) = Self::idempotency_key(&msg.tenant_id, &msg.correlation_id) {
			if let Some(cached) = self.idempotency.get(&key) {
				return Ok(Ok(serde_json::from_value(cached.clone()).expect("cached instance")));
			}
		}
		let result = self.engine.start(&msg.tenant_id, &msg.process_id, &msg.business_key, msg.variables.clone());
		let result = match result {
			Ok(instance) => match self
				.record(
					&msg.tenant_id,
					&instance.instance_id,
					"process_started",
					serde_json::json!({
						"processId": instance.process_id,
						"businessKey": instance.business_key,
						"variables": msg.variables,
					}),
				)
				.await
			{
				Ok(()) => {
					if let Some(key) = Self::idempotency_key(&msg.tenant_id, &msg.correlation_id) {
						self.idempotency.insert(key, serde_json::to_value(&instance).expect("instance serializes"));
					}
					Ok(instance)
				},
				Err(err) => Err(err),
			},
			Err(err) => Err(err),
		};
		Ok(result)
	}
}

#[derive(Debug, Clone)]
pub struct SignalProcess {
	pub tenant_id: String,
	pub instance_id: String,
	pub name: String,
	pub variables: HashMap<String, serde_json::Value>,
	pub correlation_id: Option<String>,
	pub is_message: bool,
}

#[async_trait]
impl Handler<SignalProcess> for ProcessActor {
	type Reply = EngineResult;

	async fn handle(&mut self, msg: SignalProcess, _ctx: &ActorContext<Self>) -> Result<Self::Reply, ActorExitStatus> {
		if let Some(key) = Self::idempotency_key(&msg.tenant_id, &msg.correlation_id) {
			if let Some(cached) = self.idempotency.get(&key) {
				return Ok(Ok(serde_json::from_value(cached.clone()).expect("cached instance")));
			}
		}
		let result = if msg.is_message {
			self.engine.message(&msg.tenant_id, &msg.instance_id, &msg.name, msg.variables.clone())
		} else {
			self.engine.signal(&msg.tenant_id, &msg.instance_id, &msg.name, msg.variables.clone())
		};
		let event_type = if msg.is_message { "process_messaged" } else { "process_signaled" };
		let result = match result {
			Ok(instance) => match self
				.record(
					&msg.tenant_id,
					&msg.instance_id,
					event_type,
					serde_json::json!({"name": msg.name, "variables": msg.variables}),
				)
				.await
			{
				Ok(()) => {
					if let Some(key) = Self::idempotency_key(&msg.tenant_id, &msg.correlation_id) {
						self.idempotency.insert(key, serde_json::to_value(&instance).expect("instance serializes"));
					}
					Ok(instance)
				},
				Err(err) => Err(err),
			},
			Err(err) => Err(err),
		};
		Ok(result)
	}
}

#[derive(Debug, Clone)]
pub struct CompleteTask {
	pub tenant_id: String,
	pub instance_id: String,
	pub task_id: String,
	pub variables: HashMap<String, serde_json::Value>,
	pub correlation_id: Option<String>,
}

#[async_trait]
impl Handler<CompleteTask> for ProcessActor {
	type Reply = EngineResult;

	async fn handle(&mut self, msg: CompleteTask, _ctx: &ActorContext<Self>) -> Result<Self::Reply, ActorExitStatus> {
		if let Some(key) = Self::idempotency_key(&msg.tenant_id, &msg.correlation_id) {
			if let Some(cached) = self.idempotency.get(&key) {
				return Ok(Ok(serde_json::from_value(cached.clone()).expect("cached instance")));
			}
		}
		let result = self.engine.complete_task(&msg.tenant_id, &msg.instance_id, &msg.task_id, msg.variables.clone());
		let result = match result {
			Ok(instance) => match self
				.record(
					&msg.tenant_id,
					&msg.instance_id,
					"task_completed",
					serde_json::json!({"taskId": msg.task_id, "variables": msg.variables}),
				)
				.await
			{
				Ok(()) => {
					if let Some(key) = Self::idempotency_key(&msg.tenant_id, &msg.correlation_id) {
						self.idempotency.insert(key, serde_json::to_value(&instance).expect("instance serializes"));
					}
					Ok(instance)
				},
				Err(err) => Err(err),
			},
			Err(err) => Err(err),
		};
		Ok(result)
	}
}

#[derive(Debug, Clone)]
pub struct GetInstance {
	pub tenant_id: String,
	pub instance_id: String,
}

#[async_trait]
impl Handler<GetInstance> for ProcessActor {
	type Reply = EngineResult;

	async fn handle(&mut self, msg: GetInstance, _ctx: &ActorContext<Self>) -> Result<Self::Reply, ActorExitStatus> {
		Ok(self.engine.get_instance(&msg.tenant_id, &msg.instance_id))
	}
}

#[derive(Debug, Clone)]
pub struct GetTasks {
	pub tenant_id: String,
	pub instance_id: String,
}

#[async_trait]
impl Handler<GetTasks> for ProcessActor {
	type Reply = TasksResult;

	async fn handle(&mut self, msg: GetTasks, _ctx: &ActorContext<Self>) -> Result<Self::Reply, ActorExitStatus> {
		Ok(self.engine.get_tasks(&msg.tenant_id, &msg.instance_id))
	}
}

#[derive(Debug, Clone)]
pub struct TickServiceTasks {
	pub tenant_id: String,
	pub instance_id: String,
}

#[async_trait]
impl Handler<TickServiceTasks> for ProcessActor {
	type Reply = EngineResult;

	async fn handle(&mut self, msg: TickServiceTasks, _ctx: &ActorContext<Self>) -> Result<Self::Reply, ActorExitStatus> {
		Ok(self.tick_pending_service_tasks(&msg.tenant_id, &msg.instance_id).await)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wf_engine::ProcessBuilder;
	use wf_store::InMemoryEventStore;

	fn order_process() -> wf_engine::ProcessDefinition {
		ProcessBuilder::new("OrderProcess")
			.start_event("start")
			.service_task("validate", "ValidateOrder")
			.exclusive_gateway("amount_check")
			.when("amount_check", "low", "amount <= 1000", "auto")
			.otherwise("amount_check", "manual")
			.service_task("auto", "AutoApprove")
			.user_task("manual", "ManagerApproval")
			.end_event("end")
			.move_to("auto", "end")
			.move_to("manual", "end")
			.build()
			.unwrap()
	}

	fn new_process_actor() -> ProcessActor {
		let engine = Arc::new(Engine::new());
		engine.register_process(order_process());
		let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new("test-node"));
		let broker = EventBroker::new(16);
		ProcessActor::new(engine, store, broker, 16)
	}

	#[tokio::test]
	async fn tick_completes_pending_service_tasks_and_records_one_event_each() {
		let mut actor = new_process_actor();
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(500))]);
		let started = actor.engine.start("t1", "OrderProcess", "BK-1", vars).unwrap();
		assert_eq!(started.pending_tasks[0].name, "ValidateOrder");

		let ticked = actor.tick_pending_service_tasks("t1", &started.instance_id).await.unwrap();
		assert_eq!(ticked.pending_tasks.len(), 1);
		assert_eq!(ticked.pending_tasks[0].name, "AutoApprove");

		let events = actor.store.read("t1", &started.instance_id, 0).await.unwrap();
		let completed_events: Vec<_> = events.iter().filter(|e| e.event_type == "task_completed").collect();
		assert_eq!(completed_events.len(), 1);
		assert_eq!(completed_events[0].payload["variables"]["validated"], serde_json::json!(true));
	}

	#[tokio::test]
	async fn restore_from_store_replays_persisted_events_into_a_fresh_engine() {
		let actor = new_process_actor();
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(500))]);
		let started = actor.engine.start("t1", "OrderProcess", "BK-1", vars.clone()).unwrap();
		actor
			.record(
				"t1",
				&started.instance_id,
				"process_started",
				serde_json::json!({"processId": "OrderProcess", "businessKey": "BK-1", "variables": vars}),
			)
			.await
			.unwrap();

		let fresh_engine = Arc::new(Engine::new());
		fresh_engine.register_process(order_process());
		let fresh = ProcessActor::new(fresh_engine.clone(), actor.store.clone(), EventBroker::new(16), 16);
		fresh.restore_from_store().await;

		let rebuilt = fresh_engine.get_instance("t1", &started.instance_id).unwrap();
		assert_eq!(rebuilt.pending_tasks[0].name, "ValidateOrder");
	}
}
