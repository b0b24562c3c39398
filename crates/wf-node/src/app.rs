use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use wf_actors::Runtime;
use wf_common::EventBroker;
use wf_engine::{Engine, ProcessBuilder};
use wf_rpc::Router;
use wf_store::{EventStore, InMemoryEventStore};

use crate::config::NodeConfig;
use crate::process_actor::{
	CompleteTask, GetInstance, GetTasks, ProcessActor, SignalProcess, StartProcess, TickServiceTasks,
};

/// Everything a transport handler needs to serve one request: the process
/// actor's mailbox, the raw engine for synchronous reads, and the broker
/// realtime transports subscribe to. Cheap to clone — every field is an
/// `Arc`/`MessageBus` handle.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<NodeConfig>,
	pub engine: Arc<Engine>,
	pub store: Arc<dyn EventStore>,
	pub broker: EventBroker,
	pub router: Arc<Router>,
	pub process_actor: wf_actors::MessageBus<ProcessActor>,
	/// Live WebSocket connection count, checked against
	/// `realtime_config.max_connections` on every upgrade (§4.5, §5 capacity
	/// rules).
	pub connection_count: Arc<AtomicUsize>,
	runtime: Arc<Runtime>,
}

impl AppState {
	/// Must be called from inside a running tokio runtime: spawning the
	/// process actor binds its loop to `Handle::current()`.
	pub fn build(config: NodeConfig) -> Self {
		let engine = Arc::new(Engine::new());
		engine.register_process(order_process_demo());

		let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new(config.node_id.clone()));
		let broker = EventBroker::new(config.realtime_config.event_buffer_size);
		let runtime = Arc::new(Runtime::new());

		let mailbox_capacity = config.actor_config.mailbox_capacity;
		let (process_actor_bus, _supervisor_handle) = runtime.spawn_builder::<ProcessActor>().supervise_fn({
			let engine = engine.clone();
			let store = store.clone();
			let broker = broker.clone();
			move || ProcessActor::new(engine.clone(), store.clone(), broker.clone(), mailbox_capacity)
		});

		let router = Arc::new(Router::new());

		AppState {
			config: Arc::new(config),
			engine,
			store,
			broker,
			router,
			process_actor: process_actor_bus,
			connection_count: Arc::new(AtomicUsize::new(0)),
			runtime,
		}
	}

	pub fn runtime(&self) -> &Runtime {
		&self.runtime
	}
}

/// Registered at startup so the spec's §8 order-approval scenario has a
/// process to exercise end to end: validate the order, auto-approve small
/// amounts, otherwise route to a manager for manual approval.
fn order_process_demo() -> wf_engine::ProcessDefinition {
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
		.expect("OrderProcess graph is well-formed")
}

pub async fn start_process(
	state: &AppState,
	tenant_id: String,
	process_id: String,
	business_key: String,
	variables: HashMap<String, serde_json::Value>,
	correlation_id: Option<String>,
) -> Result<wf_engine::ProcessInstance, wf_actors::AskError<wf_engine::EngineError>> {
	state
		.process_actor
		.ask_for_res(StartProcess { tenant_id, process_id, business_key, variables, correlation_id })
		.await
}

pub async fn signal_process(
	state: &AppState,
	tenant_id: String,
	instance_id: String,
	name: String,
	variables: HashMap<String, serde_json::Value>,
	correlation_id: Option<String>,
	is_message: bool,
) -> Result<wf_engine::ProcessInstance, wf_actors::AskError<wf_engine::EngineError>> {
	state
		.process_actor
		.ask_for_res(SignalProcess { tenant_id, instance_id, name, variables, correlation_id, is_message })
		.await
}

pub async fn complete_task(
	state: &AppState,
	tenant_id: String,
	instance_id: String,
	task_id: String,
	variables: HashMap<String, serde_json::Value>,
	correlation_id: Option<String>,
) -> Result<wf_engine::ProcessInstance, wf_actors::AskError<wf_engine::EngineError>> {
	state
		.process_actor
		.ask_for_res(CompleteTask { tenant_id, instance_id, task_id, variables, correlation_id })
		.await
}

pub async fn get_instance(
	state: &AppState,
	tenant_id: String,
	instance_id: String,
) -> Result<wf_engine::ProcessInstance, wf_actors::AskError<wf_engine::EngineError>> {
	state.process_actor.ask_for_res(GetInstance { tenant_id, instance_id }).await
}

pub async fn get_tasks(
	state: &AppState,
	tenant_id: String,
	instance_id: String,
) -> Result<Vec<wf_engine::Task>, wf_actors::AskError<wf_engine::EngineError>> {
	state.process_actor.ask_for_res(GetTasks { tenant_id, instance_id }).await
}

pub async fn tick_service_tasks(
	state: &AppState,
	tenant_id: String,
	instance_id: String,
) -> Result<wf_engine::ProcessInstance, wf_actors::AskError<wf_engine::EngineError>> {
	state.process_actor.ask_for_res(TickServiceTasks { tenant_id, instance_id }).await
}
