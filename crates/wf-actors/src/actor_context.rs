use std::{
	convert::Infallible,
	fmt,
	future::Future,
	ops::Deref,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use tokio::sync::{oneshot, watch};
use tracing::{debug, error};
use wf_common::{metrics::IntCounter, Progress, ProtectedZoneGuard, TerminateSignal};

#[cfg(any(test, feature = "testsuite"))]
use crate::Runtime;
use crate::{
	actor_state::AtomicState,
	registry::ActorRegistry,
	spawn_builder::{SpawnBuilder, SpawnContext},
	Actor, ActorExitStatus, ActorState, AskError, Command, DeferableReplyHandler, MessageBus,
	SendError, TrySendError,
};

/// What an actor's behavior uses to interact with the rest of the runtime:
/// send and ask other actors, schedule timers, report progress, and exit.
pub struct ActorContext<A: Actor> {
	inner: Arc<ActorContextInner<A>>,
}

impl<A: Actor> Clone for ActorContext<A> {
	fn clone(&self) -> Self {
		ActorContext { inner: self.inner.clone() }
	}
}

impl<A: Actor> Deref for ActorContext<A> {
	type Target = ActorContextInner<A>;

	fn deref(&self) -> &Self::Target {
		self.inner.as_ref()
	}
}

pub struct ActorContextInner<A: Actor> {
	spawn_ctx: SpawnContext,
	self_messagebus: MessageBus<A>,
	progress: Progress,
	actor_state: AtomicState,
	backpressure_micros_counter_opt: Option<IntCounter>,
	observable_state_tx: watch::Sender<A::ObservableState>,
	observe_enqueued: AtomicBool,
}

impl<A: Actor> ActorContext<A> {
	pub(crate) fn new(
		self_messagebus: MessageBus<A>,
		spawn_ctx: SpawnContext,
		observable_state_tx: watch::Sender<A::ObservableState>,
		backpressure_micros_counter_opt: Option<IntCounter>,
	) -> Self {
		ActorContext {
			inner: ActorContextInner {
				self_messagebus,
				spawn_ctx,
				progress: Progress::default(),
				actor_state: AtomicState::default(),
				observable_state_tx,
				backpressure_micros_counter_opt,
				observe_enqueued: AtomicBool::new(false),
			}
			.into(),
		}
	}

	pub fn spawn_ctx(&self) -> &SpawnContext {
		&self.spawn_ctx
	}

	/// Sleeps for `duration`, measured by the runtime scheduler so it can be
	/// compressed under `Runtime::with_accelerated_time`.
	///
	/// While sleeping, an actor is NOT protected from its supervisor; wrap the
	/// call in `protect_future` if the sleep is expected to outlast `HEARTBEAT`.
	pub async fn sleep(&self, duration: Duration) {
		self.spawn_ctx().scheduler_client.sleep(duration).await;
	}

	#[cfg(any(test, feature = "testsuite"))]
	pub fn for_test(
		runtime: &Runtime,
		actor_messagebus: MessageBus<A>,
		observable_state_tx: watch::Sender<A::ObservableState>,
	) -> Self {
		Self::new(actor_messagebus, runtime.spawn_ctx().clone(), observable_state_tx, None)
	}

	pub fn messagebus(&self) -> &MessageBus<A> {
		&self.self_messagebus
	}

	pub(crate) fn registry(&self) -> &ActorRegistry {
		&self.spawn_ctx.registry
	}

	pub fn actor_instance_id(&self) -> &str {
		self.messagebus().actor_instance_id()
	}

	/// Returns a guard that prevents the supervisor from identifying the actor
	/// as dead until the guard is dropped. Only needed around a blocking call
	/// into code this crate doesn't control.
	pub fn protect_zone(&self) -> ProtectedZoneGuard {
		self.progress.protect_zone()
	}

	pub async fn protect_future<Fut, T>(&self, future: Fut) -> T
	where Fut: Future<Output = T> {
		let _guard = self.protect_zone();
		future.await
	}

	/// Cooperatively yields, while keeping the actor protected.
	pub async fn yield_now(&self) {
		self.protect_future(tokio::task::yield_now()).await;
	}

	/// Gets a copy of the actor's terminate signal. Prefer returning
	/// `Err(ActorExitStatus::Failure(..))` from a handler over calling
	/// `.kill()` directly.
	pub fn terminate_sig(&self) -> &TerminateSignal {
		&self.spawn_ctx.terminate_sig
	}

	#[must_use]
	pub fn progress(&self) -> &Progress {
		&self.progress
	}

	pub fn spawn_actor<SpawnedActor: Actor>(&self) -> SpawnBuilder<SpawnedActor> {
		self.spawn_ctx.clone().spawn_builder()
	}

	/// Records progress so a handler that outlives `HEARTBEAT` is not mistaken
	/// for a stuck actor.
	pub fn record_progress(&self) {
		self.progress.record_progress();
	}

	pub(crate) fn state(&self) -> ActorState {
		self.actor_state.get_state()
	}

	pub(crate) fn pause(&self) {
		self.actor_state.pause();
	}

	pub(crate) fn resume(&self) {
		self.actor_state.resume();
	}

	/// Marks the observe queue as drained and returns its previous value, so
	/// `Observe` commands do not pile up while an actor is busy.
	pub(crate) fn set_observe_enqueued_and_return_previous(&self) -> bool {
		self.observe_enqueued.swap(true, Ordering::Relaxed)
	}

	pub fn observe(&self, actor: &mut A) -> A::ObservableState {
		let obs_state = actor.observable_state();
		self.inner.observe_enqueued.store(false, Ordering::Relaxed);
		let _ = self.observable_state_tx.send(obs_state.clone());
		obs_state
	}

	pub(crate) fn exit(&self, exit_status: &ActorExitStatus) {
		self.actor_state.exit(exit_status.is_success());
		if should_activate_terminate_sig(exit_status) {
			error!(actor=%self.actor_instance_id(), exit_status=?exit_status, "exit activating terminate signal");
			self.terminate_sig().kill();
		}
	}

	/// Posts a message to another actor's mailbox without waiting for it to be
	/// handled. The returned receiver can be awaited if the reply matters;
	/// dropping it does not cancel processing — fire-and-forget is the norm.
	///
	/// Regular messages queue in FIFO order on the low-priority lane.
	pub async fn send_message<DestActor: Actor, M>(
		&self,
		messagebus: &MessageBus<DestActor>,
		msg: M,
	) -> Result<oneshot::Receiver<DestActor::Reply>, SendError>
	where
		DestActor: DeferableReplyHandler<M>,
		M: fmt::Debug + Send + 'static,
	{
		let _guard = self.protect_zone();
		debug!(from=%self.self_messagebus.actor_instance_id(), send=%messagebus.actor_instance_id(), msg=?msg);
		messagebus
			.send_message_with_backpressure_counter(
				msg,
				self.backpressure_micros_counter_opt.as_ref(),
			)
			.await
	}

	pub async fn ask<DestActor: Actor, M, T>(
		&self,
		messagebus: &MessageBus<DestActor>,
		msg: M,
	) -> Result<T, AskError<Infallible>>
	where
		DestActor: DeferableReplyHandler<M, Reply = T>,
		M: fmt::Debug + Send + 'static,
	{
		let _guard = self.protect_zone();
		debug!(from=%self.self_messagebus.actor_instance_id(), send=%messagebus.actor_instance_id(), msg=?msg, "ask");
		messagebus
			.ask_with_backpressure_counter(msg, self.backpressure_micros_counter_opt.as_ref())
			.await
	}

	pub async fn ask_for_res<DestActor: Actor, M, T, E>(
		&self,
		messagebus: &MessageBus<DestActor>,
		msg: M,
	) -> Result<T, AskError<E>>
	where
		DestActor: DeferableReplyHandler<M, Reply = Result<T, E>>,
		M: fmt::Debug + Send + Sync + 'static,
		E: fmt::Debug,
	{
		let _guard = self.protect_zone();
		debug!(from=%self.self_messagebus.actor_instance_id(), send=%messagebus.actor_instance_id(), msg=?msg, "ask");
		messagebus.ask_for_res(msg).await
	}

	/// Queues `Command::ExitWithSuccess` behind any messages already pending
	/// for `messagebus`'s actor.
	pub async fn send_exit_with_success<Dest: Actor>(
		&self,
		messagebus: &MessageBus<Dest>,
	) -> Result<(), SendError> {
		let _guard = self.protect_zone();
		debug!(from=%self.self_messagebus.actor_instance_id(), to=%messagebus.actor_instance_id(), "success");
		messagebus.send_message(Command::ExitWithSuccess).await?;
		Ok(())
	}

	/// Sends a message to the actor's own mailbox.
	///
	/// Warning: easy to deadlock if the actor then blocks waiting on the reply.
	pub async fn send_self_message<M>(
		&self,
		msg: M,
	) -> Result<oneshot::Receiver<A::Reply>, SendError>
	where
		A: DeferableReplyHandler<M>,
		M: 'static + Sync + Send + fmt::Debug,
	{
		debug!(self=%self.self_messagebus.actor_instance_id(), msg=?msg, "self_send");
		self.self_messagebus.send_message(msg).await
	}

	/// Attempts to queue a message to the actor's own low-priority lane.
	/// Always fails against a zero-capacity mailbox.
	pub fn try_send_self_message<M>(
		&self,
		msg: M,
	) -> Result<oneshot::Receiver<A::Reply>, TrySendError<M>>
	where
		A: DeferableReplyHandler<M>,
		M: 'static + Sync + Send + fmt::Debug,
	{
		self.self_messagebus.try_send_message(msg)
	}

	/// Schedules `message` onto the actor's own high-priority lane once
	/// `after_duration` has elapsed. Used for process timers and saga
	/// step-timeout deadlines.
	pub fn schedule_self_msg<M>(&self, after_duration: Duration, message: M)
	where
		A: DeferableReplyHandler<M>,
		M: Sync + Send + fmt::Debug + 'static,
	{
		let self_messagebus = self.inner.self_messagebus.clone();
		let callback = move || {
			let _ = self_messagebus.send_message_with_high_priority(message);
		};
		self.inner.spawn_ctx.scheduler_client.schedule_event(callback, after_duration);
	}
}

/// An actor that exits abnormally kills its terminate signal, taking down
/// every actor sharing it — a process's actors do not outlive the process.
fn should_activate_terminate_sig(exit_status: &ActorExitStatus) -> bool {
	match exit_status {
		ActorExitStatus::DownstreamClosed => true,
		ActorExitStatus::Failure(_) => true,
		ActorExitStatus::Panicked => true,
		ActorExitStatus::Success => false,
		ActorExitStatus::Quit => false,
		ActorExitStatus::Killed => false,
	}
}
