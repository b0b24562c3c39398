use std::collections::HashMap;
use std::sync::RwLock;

use wf_common::{new_quid, ServiceError, ServiceErrorCode};

use crate::process::{NodeKind, ProcessDefinition, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceStatus {
	Running,
	Completed,
	Suspended,
	Terminated,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
	pub task_id: String,
	pub instance_id: String,
	pub name: String,
	pub kind: TaskKind,
	pub node_id: String,
	pub assignee: Option<String>,
	pub variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
	pub instance_id: String,
	pub process_id: String,
	pub business_key: String,
	pub tenant_id: String,
	pub status: InstanceStatus,
	pub variables: HashMap<String, serde_json::Value>,
	pub current_node: String,
	pub pending_tasks: Vec<Task>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
	#[error("process `{0}` is not registered")]
	UnknownProcess(String),
	#[error("instance `{0}` not found")]
	InstanceNotFound(String),
	#[error("task `{0}` not found on instance")]
	TaskNotFound(String),
	#[error("process `{0}` reached an undefined node `{1}`")]
	BrokenGraph(String, String),
	#[error("instance `{0}` is already {1:?}, cannot transition")]
	InvalidTransition(String, InstanceStatus),
	#[error("failed to durably record the change: {0}")]
	Persistence(String),
}

impl ServiceError for EngineError {
	fn error_code(&self) -> ServiceErrorCode {
		match self {
			EngineError::UnknownProcess(_) | EngineError::InstanceNotFound(_) | EngineError::TaskNotFound(_) => {
				ServiceErrorCode::NotFound
			},
			EngineError::BrokenGraph(_, _) => ServiceErrorCode::Internal,
			EngineError::InvalidTransition(_, _) => ServiceErrorCode::ValidationFailed,
			EngineError::Persistence(_) => ServiceErrorCode::Internal,
		}
	}
}

/// Interprets process graphs and drives instances through their lifecycle.
/// One engine typically backs one tenant-scoped actor behavior; instances
/// and definitions are keyed by `(tenant_id, id)` so a reader bound to one
/// tenant cannot observe another's instances.
#[derive(Default)]
pub struct Engine {
	definitions: RwLock<HashMap<String, ProcessDefinition>>,
	instances: RwLock<HashMap<(String, String), ProcessInstance>>,
}

impl Engine {
	pub fn new() -> Self {
		Engine::default()
	}

	pub fn register_process(&self, definition: ProcessDefinition) {
		self.definitions.write().expect("engine lock poisoned").insert(definition.process_id.clone(), definition);
	}

	/// Creates a `running` instance at the start node and drives it forward
	/// until it blocks on a task or reaches an end event.
	pub fn start(
		&self,
		tenant_id: &str,
		process_id: &str,
		business_key: &str,
		variables: HashMap<String, serde_json::Value>,
	) -> Result<ProcessInstance, EngineError> {
		self.start_with_id(tenant_id, &new_quid("instance"), process_id, business_key, variables)
	}

	/// Same as [`Engine::start`] but with a caller-supplied `instance_id`, so
	/// replaying a persisted `process_started` event reconstructs the exact
	/// instance that existed before restart instead of minting a new one.
	pub fn start_with_id(
		&self,
		tenant_id: &str,
		instance_id: &str,
		process_id: &str,
		business_key: &str,
		variables: HashMap<String, serde_json::Value>,
	) -> Result<ProcessInstance, EngineError> {
		let definitions = self.definitions.read().expect("engine lock poisoned");
		let definition =
			definitions.get(process_id).ok_or_else(|| EngineError::UnknownProcess(process_id.to_string()))?;

		let mut instance = ProcessInstance {
			instance_id: instance_id.to_string(),
			process_id: process_id.to_string(),
			business_key: business_key.to_string(),
			tenant_id: tenant_id.to_string(),
			status: InstanceStatus::Running,
			variables,
			current_node: definition.start_node.clone(),
			pending_tasks: Vec::new(),
		};
		advance(definition, &mut instance)?;
		let key = (tenant_id.to_string(), instance.instance_id.clone());
		self.instances.write().expect("engine lock poisoned").insert(key, instance.clone());
		Ok(instance)
	}

	/// Applies one previously-recorded domain event to rebuild instance state.
	/// Dispatches on the same event types `wf_node::ProcessActor::record`
	/// writes, folding `payload` through the same transitions a live call
	/// would have taken, so live and replayed state always agree.
	pub fn replay_event(
		&self,
		tenant_id: &str,
		actor_id: &str,
		event_type: &str,
		payload: &serde_json::Value,
	) -> Result<(), EngineError> {
		match event_type {
			"process_started" => {
				let process_id = payload["processId"].as_str().unwrap_or_default();
				let business_key = payload["businessKey"].as_str().unwrap_or_default();
				self.start_with_id(tenant_id, actor_id, process_id, business_key, payload_variables(payload))?;
			},
			"process_signaled" | "process_messaged" => {
				let name = payload["name"].as_str().unwrap_or_default();
				self.signal(tenant_id, actor_id, name, payload_variables(payload))?;
			},
			"task_completed" => {
				let task_id = payload["taskId"].as_str().unwrap_or_default();
				self.complete_task(tenant_id, actor_id, task_id, payload_variables(payload))?;
			},
			_ => {},
		}
		Ok(())
	}

	pub fn get_instance(&self, tenant_id: &str, instance_id: &str) -> Result<ProcessInstance, EngineError> {
		self.instances
			.read()
			.expect("engine lock poisoned")
			.get(&(tenant_id.to_string(), instance_id.to_string()))
			.cloned()
			.ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))
	}

	pub fn get_tasks(&self, tenant_id: &str, instance_id: &str) -> Result<Vec<Task>, EngineError> {
		Ok(self.get_instance(tenant_id, instance_id)?.pending_tasks)
	}

	/// Merges `variables` into the instance and advances from the node that
	/// is waiting for a signal or message named `name`, if any such pending
	/// task exists; otherwise only merges variables.
	pub fn signal(
		&self,
		tenant_id: &str,
		instance_id: &str,
		name: &str,
		variables: HashMap<String, serde_json::Value>,
	) -> Result<ProcessInstance, EngineError> {
		self.with_instance(tenant_id, instance_id, |definition, instance| {
			instance.variables.extend(variables);
			if let Some(task) = instance.pending_tasks.iter().find(|t| t.name == name).cloned() {
				complete_task_locked(definition, instance, &task.task_id, HashMap::new())?;
			}
			Ok(())
		})
	}

	pub fn message(
		&self,
		tenant_id: &str,
		instance_id: &str,
		name: &str,
		variables: HashMap<String, serde_json::Value>,
	) -> Result<ProcessInstance, EngineError> {
		self.signal(tenant_id, instance_id, name, variables)
	}

	/// Removes `task_id` from pending tasks, merges `variables`, and advances.
	pub fn complete_task(
		&self,
		tenant_id: &str,
		instance_id: &str,
		task_id: &str,
		variables: HashMap<String, serde_json::Value>,
	) -> Result<ProcessInstance, EngineError> {
		self.with_instance(tenant_id, instance_id, |definition, instance| {
			complete_task_locked(definition, instance, task_id, variables)
		})
	}

	/// Executes every currently pending service task once via `executor`,
	/// merging its output and advancing. Intended to be invoked by a
	/// background poller; a user task left pending is untouched.
	pub fn tick_service_tasks(
		&self,
		tenant_id: &str,
		instance_id: &str,
		executor: impl Fn(&Task) -> Result<HashMap<String, serde_json::Value>, String>,
	) -> Result<ProcessInstance, EngineError> {
		self.with_instance(tenant_id, instance_id, |definition, instance| {
			let service_task_ids: Vec<String> = instance
				.pending_tasks
				.iter()
				.filter(|t| t.kind == TaskKind::Service)
				.map(|t| t.task_id.clone())
				.collect();
			for task_id in service_task_ids {
				let Some(task) = instance.pending_tasks.iter().find(|t| t.task_id == task_id).cloned() else {
					continue;
				};
				match executor(&task) {
					Ok(output) => complete_task_locked(definition, instance, &task_id, output)?,
					Err(_) => {
						instance.pending_tasks.retain(|t| t.task_id != task_id);
					},
				}
			}
			Ok(())
		})
	}

	pub fn suspend(&self, tenant_id: &str, instance_id: &str) -> Result<ProcessInstance, EngineError> {
		self.set_status(tenant_id, instance_id, InstanceStatus::Running, InstanceStatus::Suspended)
	}

	pub fn resume(&self, tenant_id: &str, instance_id: &str) -> Result<ProcessInstance, EngineError> {
		self.set_status(tenant_id, instance_id, InstanceStatus::Suspended, InstanceStatus::Running)
	}

	pub fn terminate(&self, tenant_id: &str, instance_id: &str) -> Result<ProcessInstance, EngineError> {
		self.with_instance(tenant_id, instance_id, |_definition, instance| {
			instance.status = InstanceStatus::Terminated;
			Ok(())
		})
	}

	fn set_status(
		&self,
		tenant_id: &str,
		instance_id: &str,
		from: InstanceStatus,
		to: InstanceStatus,
	) -> Result<ProcessInstance, EngineError> {
		self.with_instance(tenant_id, instance_id, |_definition, instance| {
			if instance.status != from {
				return Err(EngineError::InvalidTransition(instance_id.to_string(), instance.status));
			}
			instance.status = to;
			Ok(())
		})
	}

	fn with_instance(
		&self,
		tenant_id: &str,
		instance_id: &str,
		mutate: impl FnOnce(&ProcessDefinition, &mut ProcessInstance) -> Result<(), EngineError>,
	) -> Result<ProcessInstance, EngineError> {
		let definitions = self.definitions.read().expect("engine lock poisoned");
		let mut instances = self.instances.write().expect("engine lock poisoned");
		let key = (tenant_id.to_string(), instance_id.to_string());
		let instance = instances.get_mut(&key).ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))?;
		let definition = definitions
			.get(&instance.process_id)
			.ok_or_else(|| EngineError::UnknownProcess(instance.process_id.clone()))?;
		mutate(definition, instance)?;
		Ok(instance.clone())
	}

}

fn payload_variables(payload: &serde_json::Value) -> HashMap<String, serde_json::Value> {
	payload
		.get("variables")
		.and_then(|value| value.as_object())
		.map(|map| map.clone().into_iter().collect())
		.unwrap_or_default()
}

/// Walks the graph from `instance.current_node` forward through automatic
/// nodes (gateways) until it reaches a task node (creating a pending `Task`)
/// or an end event (marking the instance `completed`).
fn advance(definition: &ProcessDefinition, instance: &mut ProcessInstance) -> Result<(), EngineError> {
	loop {
		let node = definition
			.node(&instance.current_node)
			.ok_or_else(|| EngineError::BrokenGraph(definition.process_id.clone(), instance.current_node.clone()))?;
		match &node.kind {
			NodeKind::Start => {
				let next = definition
					.next_of(&node.id)
					.ok_or_else(|| EngineError::BrokenGraph(definition.process_id.clone(), node.id.clone()))?;
				instance.current_node = next.clone();
			},
			NodeKind::End => {
				instance.status = InstanceStatus::Completed;
				return Ok(());
			},
			NodeKind::Task { kind, name, .. } => {
				instance.pending_tasks.push(Task {
					task_id: new_quid("task"),
					instance_id: instance.instance_id.clone(),
					name: name.clone(),
					kind: *kind,
					node_id: node.id.clone(),
					assignee: None,
					variables: HashMap::new(),
				});
				return Ok(());
			},
			NodeKind::ExclusiveGateway => {
				let branches = definition.branches_of(&node.id);
				let chosen = branches
					.iter()
					.find(|b| !b.is_otherwise && b.condition.as_ref().is_some_and(|c| c.eval(&instance.variables)))
					.or_else(|| branches.iter().find(|b| b.is_otherwise))
					.ok_or_else(|| EngineError::BrokenGraph(definition.process_id.clone(), node.id.clone()))?;
				instance.current_node = chosen.target.clone();
			},
			NodeKind::ParallelGateway => {
				let branches = definition.branches_of(&node.id);
				if let Some(first) = branches.first() {
					instance.current_node = first.target.clone();
				} else if let Some(next) = definition.next_of(&node.id) {
					instance.current_node = next.clone();
				} else {
					return Err(EngineError::BrokenGraph(definition.process_id.clone(), node.id.clone()));
				}
			},
		}
	}
}

fn complete_task_locked(
	definition: &ProcessDefinition,
	instance: &mut ProcessInstance,
	task_id: &str,
	variables: HashMap<String, serde_json::Value>,
) -> Result<(), EngineError> {
	let position = instance
		.pending_tasks
		.iter()
		.position(|t| t.task_id == task_id)
		.ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
	let task = instance.pending_tasks.remove(position);
	instance.variables.extend(variables);
	instance.current_node = definition
		.next_of(&task.node_id)
		.cloned()
		.ok_or_else(|| EngineError::BrokenGraph(definition.process_id.clone(), task.node_id.clone()))?;
	advance(definition, instance)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::process::ProcessBuilder;

	fn order_process() -> ProcessDefinition {
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

	#[test]
	fn start_stops_at_first_service_task() {
		let engine = Engine::new();
		engine.register_process(order_process());
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(500))]);
		let instance = engine.start("t1", "OrderProcess", "BK-1", vars).unwrap();
		assert_eq!(instance.status, InstanceStatus::Running);
		assert_eq!(instance.pending_tasks.len(), 1);
		assert_eq!(instance.pending_tasks[0].name, "ValidateOrder");
	}

	#[test]
	fn tick_routes_low_amount_to_auto_approve() {
		let engine = Engine::new();
		engine.register_process(order_process());
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(500))]);
		let started = engine.start("t1", "OrderProcess", "BK-1", vars).unwrap();
		let after_tick =
			engine.tick_service_tasks("t1", &started.instance_id, |_task| Ok(HashMap::new())).unwrap();
		assert_eq!(after_tick.pending_tasks.len(), 1);
		assert_eq!(after_tick.pending_tasks[0].name, "AutoApprove");
	}

	#[test]
	fn tick_routes_high_amount_to_manager_approval() {
		let engine = Engine::new();
		engine.register_process(order_process());
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(5000))]);
		let started = engine.start("t1", "OrderProcess", "BK-1", vars).unwrap();
		let after_tick =
			engine.tick_service_tasks("t1", &started.instance_id, |_task| Ok(HashMap::new())).unwrap();
		assert_eq!(after_tick.pending_tasks.len(), 1);
		assert_eq!(after_tick.pending_tasks[0].name, "ManagerApproval");
	}

	#[test]
	fn complete_task_on_user_task_reaches_end() {
		let engine = Engine::new();
		engine.register_process(order_process());
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(5000))]);
		let started = engine.start("t1", "OrderProcess", "BK-1", vars).unwrap();
		let after_tick =
			engine.tick_service_tasks("t1", &started.instance_id, |_task| Ok(HashMap::new())).unwrap();
		let task_id = after_tick.pending_tasks[0].task_id.clone();
		let completed = engine.complete_task("t1", &started.instance_id, &task_id, HashMap::new()).unwrap();
		assert_eq!(completed.status, InstanceStatus::Completed);
	}

	#[test]
	fn replay_of_recorded_events_reaches_the_same_state_as_the_live_calls() {
		let live = Engine::new();
		live.register_process(order_process());
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(500))]);
		let started = live.start("t1", "OrderProcess", "BK-1", vars).unwrap();
		let validate_task_id = started.pending_tasks[0].task_id.clone();
		let after_tick =
			live.tick_service_tasks("t1", &started.instance_id, |_task| Ok(HashMap::new())).unwrap();
		let approve_task_id = after_tick.pending_tasks[0].task_id.clone();
		let completed = live.complete_task("t1", &started.instance_id, &approve_task_id, HashMap::new()).unwrap();

		let replayed = Engine::new();
		replayed.register_process(order_process());
		replayed
			.replay_event(
				"t1",
				&started.instance_id,
				"process_started",
				&serde_json::json!({"processId": "OrderProcess", "businessKey": "BK-1", "variables": {"amount": 500}}),
			)
			.unwrap();
		replayed
			.replay_event(
				"t1",
				&started.instance_id,
				"task_completed",
				&serde_json::json!({"taskId": validate_task_id}),
			)
			.unwrap();
		replayed
			.replay_event(
				"t1",
				&started.instance_id,
				"task_completed",
				&serde_json::json!({"taskId": approve_task_id}),
			)
			.unwrap();

		let rebuilt = replayed.get_instance("t1", &started.instance_id).unwrap();
		assert_eq!(rebuilt.status, completed.status);
		assert_eq!(rebuilt.current_node, completed.current_node);
		assert_eq!(rebuilt.pending_tasks.len(), completed.pending_tasks.len());
	}

	#[test]
	fn tenants_cannot_read_each_others_instances() {
		let engine = Engine::new();
		engine.register_process(order_process());
		let vars = HashMap::from([("amount".to_string(), serde_json::json!(500))]);
		let started = engine.start("tenant-a", "OrderProcess", "BK-1", vars).unwrap();
		let err = engine.get_instance("tenant-b", &started.instance_id).unwrap_err();
		assert!(matches!(err, EngineError::InstanceNotFound(_)));
	}
}
