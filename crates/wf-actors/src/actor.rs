use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::ActorContext;

/// Bound on an actor's low-priority mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
	Unbounded,
	Bounded(usize),
}

/// The terminal state an actor left off in.
///
/// `Success`, `Quit`, `Killed`, `Failure`, and `Panicked` are all final:
/// the supervisor decides, from this status, whether to resume the actor.
#[derive(Debug, Clone)]
pub enum ActorExitStatus {
	/// The actor's work is done; no restart.
	Success,
	/// The actor exited normally via `Command::Quit` or `ctx.stop()`; no restart.
	Quit,
	/// The actor was forcibly killed by its supervisor after being detected as stuck.
	Killed,
	/// The actor panicked while processing a message.
	Panicked,
	/// One of the actor's downstream dependencies closed, leaving it with nothing to do.
	DownstreamClosed,
	/// The behavior returned an error; eligible for restart under the supervisor's policy.
	Failure(Arc<anyhow::Error>),
}

impl PartialEq for ActorExitStatus {
	fn eq(&self, other: &Self) -> bool {
		matches!(
			(self, other),
			(ActorExitStatus::Success, ActorExitStatus::Success)
				| (ActorExitStatus::Quit, ActorExitStatus::Quit)
				| (ActorExitStatus::Killed, ActorExitStatus::Killed)
				| (ActorExitStatus::Panicked, ActorExitStatus::Panicked)
				| (ActorExitStatus::DownstreamClosed, ActorExitStatus::DownstreamClosed)
				| (ActorExitStatus::Failure(_), ActorExitStatus::Failure(_))
		)
	}
}

impl ActorExitStatus {
	/// Whether this exit status should count against the supervisor's restart budget.
	pub fn is_restartable_failure(&self) -> bool {
		matches!(self, ActorExitStatus::Failure(_) | ActorExitStatus::Panicked)
	}

	pub fn is_success(&self) -> bool {
		matches!(self, ActorExitStatus::Success)
	}
}

impl fmt::Display for ActorExitStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ActorExitStatus::Success => write!(f, "success"),
			ActorExitStatus::Quit => write!(f, "quit"),
			ActorExitStatus::Killed => write!(f, "killed"),
			ActorExitStatus::Panicked => write!(f, "panicked"),
			ActorExitStatus::DownstreamClosed => write!(f, "downstream-closed"),
			ActorExitStatus::Failure(err) => write!(f, "failure: {err}"),
		}
	}
}

impl<E> From<E> for ActorExitStatus
where
	E: Into<anyhow::Error>,
{
	fn from(err: E) -> Self {
		ActorExitStatus::Failure(Arc::new(err.into()))
	}
}

/// A unit of encapsulated state and a behavior function that processes
/// messages strictly serially within a single lightweight task.
#[async_trait]
pub trait Actor: Send + Sized + 'static {
	type ObservableState: fmt::Debug + Clone + Send + Sync + Serialize + 'static;

	/// Snapshot of the actor's state, taken without mutating it.
	fn observable_state(&self) -> Self::ObservableState;

	fn name(&self) -> String {
		std::any::type_name::<Self>().to_string()
	}

	/// Bound on the low-priority mailbox. Defaults to `1000` per the runtime's
	/// default `mailboxCapacity`.
	fn queue_capacity(&self) -> QueueCapacity {
		QueueCapacity::Bounded(1_000)
	}

	/// Whether the actor loop yields to the scheduler between messages. Actors
	/// processing a tight, CPU-bound stream of self-messages may disable this.
	fn yield_after_each_message(&self) -> bool {
		true
	}

	/// Tokio runtime the actor's loop is spawned onto. Defaults to the current
	/// runtime; actors doing blocking work may override this to run on a
	/// dedicated blocking-pool handle.
	fn runtime_handle(&self) -> tokio::runtime::Handle {
		tokio::runtime::Handle::current()
	}

	/// Runs once before the first message is processed. An early return here
	/// behaves exactly like a behavior error: it is handed to the supervisor.
	async fn initialize(&mut self, _ctx: &ActorContext<Self>) -> Result<(), ActorExitStatus> {
		Ok(())
	}

	/// Runs once the mailbox has been drained down to empty, while the actor
	/// is in the `Running` state. Useful for batched work that should flush
	/// once no more messages are immediately available.
	async fn on_drained_messages(&mut self, _ctx: &ActorContext<Self>) -> Result<(), ActorExitStatus> {
		Ok(())
	}

	/// Runs once after the actor has stopped processing messages, regardless
	/// of the exit status.
	async fn finalize(
		&mut self,
		_exit_status: &ActorExitStatus,
		_ctx: &ActorContext<Self>,
	) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Implemented once per `(Actor, Message)` pair: the pure function
/// `(state, message, ctx) -> state'` the spec calls the behavior contract.
#[async_trait]
pub trait Handler<M>: Actor
where
	M: fmt::Debug + Send + 'static,
{
	type Reply: fmt::Debug + Send + Sync + 'static;

	async fn handle(
		&mut self,
		message: M,
		ctx: &ActorContext<Self>,
	) -> Result<Self::Reply, ActorExitStatus>;
}

/// Bridges a `Handler<M>` to the envelope machinery, which only knows how to
/// deliver a message and a reply channel. Blanket-implemented for every
/// `Handler`, so actor authors never see this trait directly.
#[async_trait]
pub trait DeferableReplyHandler<M>: Actor
where
	M: fmt::Debug + Send + 'static,
{
	type Reply: fmt::Debug + Send + Sync + 'static;

	async fn handle_message(
		&mut self,
		message: M,
		reply_tx: oneshot::Sender<Self::Reply>,
		ctx: &ActorContext<Self>,
	) -> Result<(), ActorExitStatus>;
}

#[async_trait]
impl<A, M> DeferableReplyHandler<M> for A
where
	A: Handler<M>,
	M: fmt::Debug + Send + 'static,
{
	type Reply = <A as Handler<M>>::Reply;

	async fn handle_message(
		&mut self,
		message: M,
		reply_tx: oneshot::Sender<Self::Reply>,
		ctx: &ActorContext<Self>,
	) -> Result<(), ActorExitStatus> {
		let reply = self.handle(message, ctx).await?;
		// The caller may have dropped the receiver (e.g. `tell` instead of `ask`).
		let _ = reply_tx.send(reply);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn restartable_failure_classification() {
		assert!(ActorExitStatus::Panicked.is_restartable_failure());
		assert!(ActorExitStatus::from(anyhow::anyhow!("boom")).is_restartable_failure());
		assert!(!ActorExitStatus::Success.is_restartable_failure());
		assert!(!ActorExitStatus::Quit.is_restartable_failure());
		assert!(!ActorExitStatus::Killed.is_restartable_failure());
	}
}
