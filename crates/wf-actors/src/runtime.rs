use std::{collections::HashMap, thread, time::Duration};

use crate::{
	registry::ActorObservation,
	scheduler::start_scheduler,
	spawn_builder::{SpawnBuilder, SpawnContext},
	Actor, ActorExitStatus, Command, MessageBus,
};

/// Owns the scheduler and actor registry shared by every actor it spawns.
/// One `Runtime` exists per process in production; tests typically create a
/// fresh one per test via `Runtime::with_accelerated_time`.
pub struct Runtime {
	pub(crate) spawn_ctx: SpawnContext,
}

impl Default for Runtime {
	fn default() -> Runtime {
		Runtime::new()
	}
}

impl Runtime {
	pub fn new() -> Runtime {
		let scheduler_client = start_scheduler();
		Runtime { spawn_ctx: SpawnContext::new(scheduler_client) }
	}

	/// Pauses the runtime's clock so tests can drive long-running schedules
	/// (heartbeats, saga timeouts, process `after(duration)` transitions)
	/// without waiting them out in real time.
	#[cfg(any(test, feature = "testsuite"))]
	pub fn with_accelerated_time() -> Runtime {
		let runtime = Runtime::new();
		runtime.spawn_ctx().scheduler_client.accelerate_time();
		runtime
	}

	pub fn spawn_ctx(&self) -> &SpawnContext {
		&self.spawn_ctx
	}

	pub fn create_test_messagebus<A: Actor>(&self) -> (MessageBus<A>, crate::messagebus::Inbox<A>) {
		self.spawn_ctx.create_messagebus("test-messagebus", crate::QueueCapacity::Unbounded)
	}

	pub fn create_messagebus<A: Actor>(
		&self,
		actor_name: impl ToString,
		queue_capacity: crate::QueueCapacity,
	) -> (MessageBus<A>, crate::messagebus::Inbox<A>) {
		self.spawn_ctx.create_messagebus(actor_name, queue_capacity)
	}

	pub fn get<A: Actor>(&self) -> Vec<MessageBus<A>> {
		self.spawn_ctx.registry.get::<A>()
	}

	pub fn get_one<A: Actor>(&self) -> Option<MessageBus<A>> {
		self.spawn_ctx.registry.get_one::<A>()
	}

	pub async fn observe(&self, timeout: Duration) -> Vec<ActorObservation> {
		self.spawn_ctx.registry.observe(timeout).await
	}

	/// Kills every actor spawned from this runtime.
	pub fn kill(&self) {
		self.spawn_ctx.terminate_sig.kill();
	}

	pub async fn sleep(&self, duration: Duration) {
		self.spawn_ctx.scheduler_client.sleep(duration).await;
	}

	pub fn spawn_builder<A: Actor>(&self) -> SpawnBuilder<A> {
		self.spawn_ctx.spawn_builder()
	}

	pub async fn send_exit_with_success<A: Actor>(
		&self,
		messagebus: &MessageBus<A>,
	) -> Result<(), crate::SendError> {
		messagebus.send_message(Command::ExitWithSuccess).await?;
		Ok(())
	}

	pub async fn quit(&self) -> HashMap<String, ActorExitStatus> {
		self.spawn_ctx.registry.quit().await
	}

	/// Quits every actor and panics if any of them panicked. Call at the end
	/// of a test instead of letting `Runtime` drop with actors still running.
	#[cfg(any(test, feature = "testsuite"))]
	pub async fn assert_quit(self) {
		let exit_statuses = self.quit().await;
		assert!(
			!exit_statuses.values().any(|status| matches!(status, ActorExitStatus::Panicked)),
			"an actor panicked: {exit_statuses:?}"
		);
	}
}

impl Drop for Runtime {
	fn drop(&mut self) {
		if cfg!(any(test, feature = "testsuite")) && !self.spawn_ctx.registry.is_empty() && !thread::panicking() {
			panic!("there are still running actors at the end of the test; call `runtime.assert_quit()`");
		}
		self.spawn_ctx.terminate_sig.kill();
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;
	use crate::{Actor, ActorContext, Handler};

	#[derive(Debug)]
	struct Loop;

	#[derive(Default)]
	struct CountingMinutesActor {
		count: usize,
	}

	#[async_trait]
	impl Actor for CountingMinutesActor {
		type ObservableState = usize;

		fn observable_state(&self) -> usize {
			self.count
		}

		async fn initialize(&mut self, ctx: &ActorContext<Self>) -> Result<(), ActorExitStatus> {
			ctx.schedule_self_msg(Duration::from_secs(60), Loop);
			Ok(())
		}
	}

	#[async_trait]
	impl Handler<Loop> for CountingMinutesActor {
		type Reply = ();

		async fn handle(&mut self, _msg: Loop, ctx: &ActorContext<Self>) -> Result<(), ActorExitStatus> {
			self.count += 1;
			ctx.schedule_self_msg(Duration::from_secs(60), Loop);
			Ok(())
		}
	}

	#[derive(Default)]
	struct ExitPanickingActor;

	#[async_trait]
	impl Actor for ExitPanickingActor {
		type ObservableState = ();

		fn observable_state(&self) {}
	}

	impl Drop for ExitPanickingActor {
		fn drop(&mut self) {
			panic!("boom");
		}
	}

	#[tokio::test]
	async fn test_schedule_for_actor() {
		let runtime = Runtime::with_accelerated_time();
		let (_messagebus, handle) = runtime.spawn_builder().spawn(CountingMinutesActor::default());
		assert_eq!(handle.observe().await.state, 0);
		runtime.sleep(Duration::from_secs(200)).await;
		let state = handle.observe().await.state;
		assert!(state >= 3, "expected at least 3 ticks after 200s, got {state}");
		runtime.assert_quit().await;
	}

	#[tokio::test]
	async fn test_actor_quit_after_runtime_quit() {
		let runtime = Runtime::with_accelerated_time();
		let (_messagebus, handle) = runtime.spawn_builder().spawn(CountingMinutesActor::default());
		runtime.quit().await;
		assert!(handle.state().is_exit());
	}

	#[tokio::test]
	async fn test_runtime_join_after_actor_quit() {
		let runtime = Runtime::with_accelerated_time();
		let (messagebus, handle) = runtime.spawn_builder().spawn(CountingMinutesActor::default());
		runtime.send_exit_with_success(&messagebus).await.unwrap();
		let (exit_status, _state) = handle.join().await;
		assert!(exit_status.is_success());
	}

	#[tokio::test]
	async fn test_runtime_quit_with_panicking_actor() {
		let runtime = Runtime::with_accelerated_time();
		let (_messagebus, _handle) = runtime.spawn_builder().spawn(ExitPanickingActor);
		let exit_statuses = runtime.quit().await;
		assert!(exit_statuses.values().any(|status| matches!(status, ActorExitStatus::Panicked)));
	}

	#[tokio::test]
	#[should_panic(expected = "assert_quit")]
	async fn test_enforce_runtime_assert_quit_calls() {
		let runtime = Runtime::with_accelerated_time();
		let (_messagebus, _handle) = runtime.spawn_builder().spawn(CountingMinutesActor::default());
		drop(runtime);
	}
}
