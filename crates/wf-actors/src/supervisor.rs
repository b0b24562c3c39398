use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
	actor_handle::Healthz,
	messagebus::Inbox, Actor, ActorContext, ActorExitStatus, ActorHandle, ActorState, Handler,
	Health, Supervisable,
};

/// Governs how many times a supervisor will respawn a failed actor, and how
/// long it waits between attempts, before giving up and letting the failure
/// propagate as the supervisor's own exit status.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
	pub max_restarts: usize,
	pub base_backoff: Duration,
	pub max_backoff: Duration,
}

impl Default for RestartPolicy {
	fn default() -> Self {
		RestartPolicy {
			max_restarts: 5,
			base_backoff: Duration::from_millis(200),
			max_backoff: Duration::from_secs(30),
		}
	}
}

impl RestartPolicy {
	fn backoff_for(&self, restart_count: usize) -> Duration {
		let factor = 1u32.checked_shl(restart_count.min(16) as u32).unwrap_or(u32::MAX);
		self.base_backoff.saturating_mul(factor).min(self.max_backoff)
	}
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct SupervisorMetrics {
	pub num_panics: usize,
	pub num_errors: usize,
	pub num_kills: usize,
	pub num_restarts: usize,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SupervisorState<S> {
	pub metrics: SupervisorMetrics,
	pub state_opt: Option<S>,
	pub exhausted: bool,
}

impl<S> Default for SupervisorState<S> {
	fn default() -> Self {
		SupervisorState { metrics: Default::default(), state_opt: None, exhausted: false }
	}
}

pub struct Supervisor<A: Actor> {
	actor_name: String,
	actor_factory: Box<dyn Fn() -> A + Send>,
	inbox: Inbox<A>,
	handle_opt: Option<ActorHandle<A>>,
	metrics: SupervisorMetrics,
	policy: RestartPolicy,
	restart_count: usize,
	exhausted: bool,
}

#[derive(Debug, Copy, Clone)]
struct SuperviseLoop;

#[async_trait]
impl<A: Actor> Actor for Supervisor<A> {
	type ObservableState = SupervisorState<A::ObservableState>;

	fn observable_state(&self) -> Self::ObservableState {
		let state_opt: Option<A::ObservableState> =
			self.handle_opt.as_ref().map(|handle| handle.last_observation());
		SupervisorState { metrics: self.metrics, state_opt, exhausted: self.exhausted }
	}

	fn name(&self) -> String {
		format!("Supervisor({})", self.actor_name)
	}

	fn queue_capacity(&self) -> crate::QueueCapacity {
		crate::QueueCapacity::Unbounded
	}

	async fn initialize(&mut self, ctx: &ActorContext<Self>) -> Result<(), ActorExitStatus> {
		ctx.schedule_self_msg(*crate::HEARTBEAT, SuperviseLoop);
		Ok(())
	}

	async fn finalize(
		&mut self,
		exit_status: &ActorExitStatus,
		_ctx: &ActorContext<Self>,
	) -> anyhow::Result<()> {
		match exit_status {
			ActorExitStatus::Quit =>
				if let Some(handle) = self.handle_opt.take() {
					handle.quit().await;
				},
			ActorExitStatus::Killed =>
				if let Some(handle) = self.handle_opt.take() {
					handle.kill().await;
				},
			ActorExitStatus::Failure(_) | ActorExitStatus::Success | ActorExitStatus::DownstreamClosed => {
			},
			ActorExitStatus::Panicked => {},
		}
		Ok(())
	}
}

impl<A: Actor> Supervisor<A> {
	pub(crate) fn new(
		actor_name: String,
		actor_factory: Box<dyn Fn() -> A + Send>,
		inbox: Inbox<A>,
		handle: ActorHandle<A>,
	) -> Self {
		Self::with_policy(actor_name, actor_factory, inbox, handle, RestartPolicy::default())
	}

	pub(crate) fn with_policy(
		actor_name: String,
		actor_factory: Box<dyn Fn() -> A + Send>,
		inbox: Inbox<A>,
		handle: ActorHandle<A>,
		policy: RestartPolicy,
	) -> Self {
		Supervisor {
			actor_name,
			actor_factory,
			inbox,
			handle_opt: Some(handle),
			metrics: Default::default(),
			policy,
			restart_count: 0,
			exhausted: false,
		}
	}

	async fn supervise(&mut self, ctx: &ActorContext<Supervisor<A>>) -> Result<(), ActorExitStatus> {
		if self.exhausted {
			return Ok(());
		}
		let handle_ref = self.handle_opt.as_ref().expect("the actor handle should always be set");
		match handle_ref.check_health(true) {
			Health::Healthy => {
				handle_ref.refresh_observe();
				return Ok(());
			},
			Health::FailureOrUnhealthy => {},
			Health::Success => {
				return Err(ActorExitStatus::Success);
			},
		}
		warn!("unhealthy-actor");
		let actor_handle = self.handle_opt.take().unwrap();
		let actor_messagebus = actor_handle.messagebus().clone();
		let (actor_exit_status, _last_state) = if actor_handle.state() == ActorState::Processing {
			warn!("killing");
			actor_handle.kill().await
		} else {
			actor_handle.join().await
		};
		match actor_exit_status {
			ActorExitStatus::Success => return Err(ActorExitStatus::Success),
			ActorExitStatus::Quit => return Err(ActorExitStatus::Quit),
			ActorExitStatus::DownstreamClosed => return Err(ActorExitStatus::DownstreamClosed),
			ActorExitStatus::Killed => self.metrics.num_kills += 1,
			ActorExitStatus::Failure(ref _err) => self.metrics.num_errors += 1,
			ActorExitStatus::Panicked => self.metrics.num_panics += 1,
		}
		if self.restart_count >= self.policy.max_restarts {
			self.exhausted = true;
			warn!(
				actor = %self.actor_name,
				restarts = self.restart_count,
				"restart-budget-exhausted giving up"
			);
			return Err(actor_exit_status);
		}
		let backoff = self.policy.backoff_for(self.restart_count);
		if !backoff.is_zero() {
			ctx.sleep(backoff).await;
		}
		self.restart_count += 1;
		self.metrics.num_restarts += 1;
		info!(actor = %self.actor_name, attempt = self.restart_count, backoff = ?backoff, "respawning-actor");
		// `(*self.actor_factory)()` only produces the actor's *default* state;
		// `spawn()` below still runs `Actor::initialize()` on it before any new
		// message is processed, same as the first spawn. An actor backed by
		// durable storage restores its last durable version (snapshot + event
		// replay) from inside that hook — see `ProcessActor::initialize` for
		// the one supervised actor in this workspace that does.
		let (_, actor_handle) = ctx
			.spawn_actor()
			.set_messagebuses(actor_messagebus, self.inbox.clone())
			.set_terminate_sig(ctx.terminate_sig().child())
			.spawn((*self.actor_factory)());
		self.handle_opt = Some(actor_handle);
		Ok(())
	}
}

#[async_trait]
impl<A: Actor> Handler<SuperviseLoop> for Supervisor<A> {
	type Reply = ();

	async fn handle(
		&mut self,
		_msg: SuperviseLoop,
		ctx: &ActorContext<Self>,
	) -> Result<Self::Reply, ActorExitStatus> {
		self.supervise(ctx).await?;
		ctx.schedule_self_msg(*crate::HEARTBEAT, SuperviseLoop);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use async_trait::async_trait;
	use tracing::info;

	use crate::{
		supervisor::{RestartPolicy, SupervisorMetrics},
		tests::{Ping, PingReceiverActor},
		Actor, ActorContext, ActorExitStatus, AskError, Handler, Observe, Runtime,
	};

	#[derive(Copy, Clone, Debug)]
	enum FailingActorMessage {
		Panic,
		ReturnError,
		Increment,
		Freeze(Duration),
	}

	#[derive(Default, Clone)]
	struct FailingActor {
		counter: usize,
	}

	#[async_trait]
	impl Actor for FailingActor {
		type ObservableState = usize;

		fn name(&self) -> String {
			"FailingActor".to_string()
		}

		fn observable_state(&self) -> Self::ObservableState {
			self.counter
		}

		async fn finalize(
			&mut self,
			_exit_status: &ActorExitStatus,
			_ctx: &ActorContext<Self>,
		) -> anyhow::Result<()> {
			info!("finalize-failing-actor");
			Ok(())
		}
	}

	#[async_trait]
	impl Handler<FailingActorMessage> for FailingActor {
		type Reply = usize;

		async fn handle(
			&mut self,
			msg: FailingActorMessage,
			ctx: &ActorContext<Self>,
		) -> Result<Self::Reply, ActorExitStatus> {
			match msg {
				FailingActorMessage::Panic => {
					panic!("Failing actor panicked");
				},
				FailingActorMessage::ReturnError => {
					return Err(ActorExitStatus::from(anyhow::anyhow!("failing actor error")));
				},
				FailingActorMessage::Increment => {
					self.counter += 1;
				},
				FailingActorMessage::Freeze(wait_duration) => {
					ctx.sleep(wait_duration).await;
				},
			}
			Ok(self.counter)
		}
	}

	#[tokio::test]
	async fn test_supervisor_restart_on_panic() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (messagebus, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 2);
		assert!(messagebus.ask(FailingActorMessage::Panic).await.is_err());
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		let observed = supervisor_handle.observe().await.metrics;
		assert_eq!(observed.num_panics, 1);
		assert_eq!(observed.num_restarts, 1);
		assert!(!matches!(supervisor_handle.quit().await.0, ActorExitStatus::Panicked));
	}

	#[tokio::test]
	async fn test_supervisor_restart_on_error() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (messagebus, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 2);
		assert!(messagebus.ask(FailingActorMessage::ReturnError).await.is_err());
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		let observed = supervisor_handle.observe().await.metrics;
		assert_eq!(observed.num_panics, 0);
		assert_eq!(observed.num_errors, 1);
		assert!(!matches!(supervisor_handle.quit().await.0, ActorExitStatus::Panicked));
	}

	#[tokio::test]
	async fn test_supervisor_kills_and_restart_frozen_actor() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (messagebus, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 2);
		assert_eq!(supervisor_handle.observe().await.metrics.num_kills, 0);
		messagebus
			.send_message(FailingActorMessage::Freeze(crate::HEARTBEAT.mul_f32(3.0f32)))
			.await
			.unwrap();
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		assert_eq!(supervisor_handle.observe().await.metrics.num_kills, 1);
		assert!(!matches!(supervisor_handle.quit().await.0, ActorExitStatus::Panicked));
	}

	#[tokio::test]
	async fn test_supervisor_gives_up_after_restart_budget_exhausted() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (messagebus, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		// Repeated panics exhaust the default restart budget; past that point
		// the supervisor stops respawning and the actor stays unreachable.
		for _ in 0..(RestartPolicy::default().max_restarts + 2) {
			let _ = messagebus.ask(FailingActorMessage::Panic).await;
			runtime.sleep(crate::HEARTBEAT.mul_f32(2.0)).await;
		}
		let observed = supervisor_handle.observe().await;
		assert!(observed.exhausted);
		assert_eq!(observed.metrics.num_restarts, RestartPolicy::default().max_restarts);
		runtime.assert_quit().await;
	}

	#[tokio::test]
	async fn test_supervisor_forwards_quit_commands() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (messagebus, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		let (exit_status, _state) = supervisor_handle.quit().await;
		assert!(matches!(
			messagebus.ask(FailingActorMessage::Increment).await.unwrap_err(),
			AskError::MessageNotDelivered
		));
		assert!(matches!(exit_status, ActorExitStatus::Quit));
	}

	#[tokio::test]
	async fn test_supervisor_forwards_kill_command() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (messagebus, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		assert_eq!(messagebus.ask(FailingActorMessage::Increment).await.unwrap(), 1);
		let (exit_status, _state) = supervisor_handle.kill().await;
		assert!(messagebus.ask(FailingActorMessage::Increment).await.is_err());
		assert!(matches!(
			messagebus.ask(FailingActorMessage::Increment).await.unwrap_err(),
			AskError::MessageNotDelivered
		));
		assert!(matches!(exit_status, ActorExitStatus::Killed));
	}

	#[tokio::test]
	async fn test_supervisor_exits_successfully_when_supervised_actor_messagebus_is_dropped() {
		let runtime = Runtime::with_accelerated_time();
		let actor = FailingActor::default();
		let (_, supervisor_handle) = runtime.spawn_builder().supervise(actor);
		let (exit_status, _state) = supervisor_handle.join().await;
		assert!(matches!(exit_status, ActorExitStatus::Success));
		runtime.assert_quit().await;
	}

	#[tokio::test]
	async fn test_supervisor_state() {
		let runtime = Runtime::with_accelerated_time();
		let ping_actor = PingReceiverActor::default();
		let (messagebus, handler) = runtime.spawn_builder().supervise(ping_actor);
		let obs = handler.observe().await;
		assert_eq!(obs.state.state_opt, Some(0));
		let _ = messagebus.ask(Ping).await;
		assert_eq!(messagebus.ask(Observe).await.unwrap(), 1);
		runtime.sleep(Duration::from_secs(60)).await;
		let obs = handler.observe().await;
		assert_eq!(obs.state.state_opt, Some(1));
		handler.quit().await;
		runtime.assert_quit().await;
	}
}
