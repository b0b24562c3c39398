use std::{ops::Deref, sync::atomic::AtomicU64, sync::atomic::Ordering, time::Duration};

use tokio::{sync::watch, time::timeout};

use crate::{
	registry::ActorJoinHandle, Actor, ActorContext, ActorExitStatus, ActorState, Command,
	MessageBus, Observe,
};

/// Outcome of a supervisor's periodic health check of a running actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
	/// The actor is alive and has recorded progress since the last check.
	Healthy,
	/// The actor exited abnormally, or recorded no progress within `HEARTBEAT`
	/// and should be considered stuck.
	FailureOrUnhealthy,
	/// The actor exited with `ActorExitStatus::Success`; no restart wanted.
	Success,
}

pub trait Healthz {
	fn check_health(&self, healthcheck_enabled: bool) -> Health;
}

/// Marker for anything a `Supervisor` can hold and restart: both a plain
/// `ActorHandle<A>` and a nested `ActorHandle<Supervisor<A>>` qualify.
pub trait Supervisable: Send {}

impl<A: Actor> Supervisable for ActorHandle<A> {}

/// The observed value returned by `ActorHandle::observe`, together with
/// whether the observation reflects a still-running actor.
#[derive(Debug, Clone)]
pub struct Observation<State> {
	pub obs_type: ObservationType,
	pub state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationType {
	Running,
	Terminated,
	Timeout,
}

impl<State> Deref for Observation<State> {
	type Target = State;

	fn deref(&self) -> &State {
		&self.state
	}
}

/// Address used to observe and supervise a spawned actor from outside its loop.
pub struct ActorHandle<A: Actor> {
	join_handle: ActorJoinHandle,
	ctx: ActorContext<A>,
	last_state_rx: watch::Receiver<A::ObservableState>,
	last_progress_tick: AtomicU64,
}

impl<A: Actor> ActorHandle<A> {
	pub(crate) fn new(
		last_state_rx: watch::Receiver<A::ObservableState>,
		join_handle: ActorJoinHandle,
		ctx: ActorContext<A>,
	) -> Self {
		ActorHandle { join_handle, ctx, last_state_rx, last_progress_tick: AtomicU64::new(0) }
	}

	pub fn state(&self) -> ActorState {
		self.ctx.state()
	}

	pub fn messagebus(&self) -> &MessageBus<A> {
		self.ctx.messagebus()
	}

	pub fn actor_instance_id(&self) -> &str {
		self.ctx.actor_instance_id()
	}

	/// The last state snapshot sent by the actor, without round-tripping
	/// through its mailbox.
	pub fn last_observation(&self) -> A::ObservableState {
		self.last_state_rx.borrow().clone()
	}

	/// Fire-and-forget `Observe`, useful to refresh `last_observation` without
	/// waiting on the result.
	pub fn refresh_observe(&self) {
		let _ = self.messagebus().send_message_with_high_priority(ObserveNudge);
	}

	/// Snapshots the actor's observable state. Since `Observe` is queued like
	/// any other message, the snapshot reflects every message enqueued before
	/// this call returns, modulo a `HEARTBEAT`-bounded timeout.
	pub async fn observe(&self) -> Observation<A::ObservableState> {
		let observe_result = timeout(*crate::HEARTBEAT, self.messagebus().ask(Observe)).await;
		let state = self.last_state_rx.borrow().clone();
		match observe_result {
			Ok(Ok(state)) => Observation { obs_type: ObservationType::Running, state },
			Ok(Err(_)) => Observation { obs_type: ObservationType::Terminated, state },
			Err(_) if self.state().is_running() => Observation { obs_type: ObservationType::Timeout, state },
			Err(_) => Observation { obs_type: ObservationType::Terminated, state },
		}
	}

	/// Waits for the actor to exit, returning its final status and state.
	pub async fn join(&self) -> (ActorExitStatus, A::ObservableState) {
		let exit_status = self.join_handle.join().await;
		(exit_status, self.last_observation())
	}

	/// Kills the actor's terminate signal (and every actor sharing it), then
	/// waits for it to exit.
	pub async fn kill(&self) -> (ActorExitStatus, A::ObservableState) {
		self.ctx.terminate_sig().kill();
		let _ = self.messagebus().send_message_with_high_priority(Command::Nudge);
		self.join().await
	}

	/// Asks the actor to shut down gracefully, then waits for it to exit.
	pub async fn quit(&self) -> (ActorExitStatus, A::ObservableState) {
		let _ = self.messagebus().send_message_with_high_priority(Command::Quit);
		self.join().await
	}

	pub async fn pause(&self) {
		let _ = self.messagebus().send_message_with_high_priority(Command::Pause);
	}

	pub async fn resume(&self) {
		let _ = self.messagebus().send_message_with_high_priority(Command::Resume);
	}
}

/// Marker used only to wake a paused/idle actor loop when refreshing
/// observation without blocking on the reply.
#[derive(Debug)]
struct ObserveNudge;

#[async_trait::async_trait]
impl<A: Actor> crate::Handler<ObserveNudge> for A {
	type Reply = ();

	async fn handle(
		&mut self,
		_msg: ObserveNudge,
		ctx: &ActorContext<Self>,
	) -> Result<(), ActorExitStatus> {
		ctx.observe(self);
		Ok(())
	}
}

impl<A: Actor> Healthz for ActorHandle<A> {
	fn check_health(&self, healthcheck_enabled: bool) -> Health {
		if self.state().is_exit() {
			return if self.state() == ActorState::Success { Health::Success } else { Health::FailureOrUnhealthy };
		}
		if !healthcheck_enabled {
			return Health::Healthy;
		}
		let current_tick = self.ctx.progress().tick();
		let last_tick = self.last_progress_tick.swap(current_tick, Ordering::SeqCst);
		if current_tick == last_tick && self.ctx.progress().num_protected_zones() == 0 {
			Health::FailureOrUnhealthy
		} else {
			Health::Healthy
		}
	}
}

/// Duration `ActorHandle::observe` waits for a reply before reporting
/// `ObservationType::Timeout`. Kept separate from `HEARTBEAT` so callers can
/// override it for slow actors without affecting supervision cadence.
#[allow(dead_code)]
pub(crate) const DEFAULT_OBSERVE_TIMEOUT: Duration = Duration::from_secs(3);
