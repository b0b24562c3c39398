use std::{
	any::Any,
	convert::Infallible,
	fmt,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Weak,
	},
	time::Instant,
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use wf_common::metrics::IntCounter;

use crate::{
	channel_with_priority::{Receiver, Sender, TrySendError},
	envelope::{wrap_in_envelope, Envelope},
	scheduler::SchedulerClient,
	Actor, ActorContext, ActorExitStatus, AskError, DeferableReplyHandler, Handler, QueueCapacity,
	RecvError, SendError,
};

/// A lightweight, cloneable handle used to send messages to an actor. The
/// actor itself holds the matching `Inbox`.
///
/// High-priority messages (commands, scheduled timers) are processed before
/// low-priority ones (regular actor-to-actor traffic), whenever both are
/// pending.
///
/// Once every messagebus for an actor is dropped, the actor drains its
/// remaining mailbox and exits with `ActorExitStatus::Success`.
pub struct MessageBus<A: Actor> {
	inner: Arc<Inner<A>>,
	// Not derived from `Arc::strong_count`: we need the `Nudge` sent on the
	// last drop to happen strictly after the refcount decrement is visible.
	ref_count: Arc<AtomicUsize>,
}

impl<A: Actor> MessageBus<A> {
	pub fn downgrade(&self) -> WeakMessagebus<A> {
		WeakMessagebus { inner: Arc::downgrade(&self.inner), ref_count: Arc::downgrade(&self.ref_count) }
	}
}

impl<A: Actor> Drop for MessageBus<A> {
	fn drop(&mut self) {
		let old_val = self.ref_count.fetch_sub(1, Ordering::SeqCst);
		if old_val == 2 {
			// `ref_count == 1` after this drop means only the ActorContext's
			// copy remains; nudge so its recv loop notices and can drain.
			let _ = self.send_message_with_high_priority(LastMessagebus);
		}
	}
}

#[derive(Debug)]
struct LastMessagebus;

#[async_trait]
impl<A: Actor> Handler<LastMessagebus> for A {
	type Reply = ();

	async fn handle(
		&mut self,
		_: LastMessagebus,
		_ctx: &ActorContext<Self>,
	) -> Result<(), ActorExitStatus> {
		// Being the last messagebus doesn't necessarily mean we should stop:
		// a pending message might still spawn an actor that hands out a new
		// messagebus. The real "last messagebus" detection happens once the
		// mailbox is drained; this message just wakes a recv loop that would
		// otherwise wait forever.
		Ok(())
	}
}

#[derive(Copy, Clone)]
pub(crate) enum Priority {
	High,
	Low,
}

impl<A: Actor> Clone for MessageBus<A> {
	fn clone(&self) -> Self {
		self.ref_count.fetch_add(1, Ordering::SeqCst);
		MessageBus { inner: self.inner.clone(), ref_count: self.ref_count.clone() }
	}
}

impl<A: Actor> MessageBus<A> {
	pub(crate) fn is_last_messagebus(&self) -> bool {
		self.ref_count.load(Ordering::SeqCst) == 1
	}

	pub fn id(&self) -> &str {
		&self.inner.instance_id
	}

	pub(crate) fn scheduler_client(&self) -> Option<&SchedulerClient> {
		self.inner.scheduler_client_opt.as_ref()
	}
}

struct Inner<A: Actor> {
	pub(crate) tx: Sender<Envelope<A>>,
	scheduler_client_opt: Option<SchedulerClient>,
	instance_id: String,
}

impl<A: Actor> fmt::Debug for MessageBus<A> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_tuple("MessageBus").field(&self.actor_instance_id()).finish()
	}
}

impl<A: Actor> MessageBus<A> {
	pub fn actor_instance_id(&self) -> &str {
		&self.inner.instance_id
	}

	pub fn is_disconnected(&self) -> bool {
		self.inner.tx.is_disconnected()
	}

	/// Sends a message to the actor owning this mailbox.
	///
	/// From inside a handler, prefer `ActorContext::send_message`.
	/// Fails only once the actor has already exited.
	pub async fn send_message<M>(
		&self,
		message: M,
	) -> Result<oneshot::Receiver<A::Reply>, SendError>
	where
		A: DeferableReplyHandler<M>,
		M: fmt::Debug + Send + 'static,
	{
		self.send_message_with_backpressure_counter(message, None).await
	}

	/// Attempts to queue a message on the low-priority lane without blocking.
	/// Returns `TrySendError::Full(message)` if the mailbox is saturated.
	pub fn try_send_message<M>(
		&self,
		message: M,
	) -> Result<oneshot::Receiver<A::Reply>, TrySendError<M>>
	where
		A: DeferableReplyHandler<M>,
		M: fmt::Debug + Send + 'static,
	{
		let (envelope, response_rx) = wrap_in_envelope(message);
		self.inner.tx.try_send_low_priority(envelope).map_err(|err| match err {
			TrySendError::Disconnected => TrySendError::Disconnected,
			TrySendError::Full(mut envelope) => {
				let message: M = envelope.message_typed().unwrap();
				TrySendError::Full(message)
			},
		})?;
		Ok(response_rx)
	}

	/// Sends a message to the actor, adding to `backpressure_micros_counter_opt`
	/// the microseconds spent blocked on a saturated mailbox.
	pub async fn send_message_with_backpressure_counter<M>(
		&self,
		message: M,
		backpressure_micros_counter_opt: Option<&IntCounter>,
	) -> Result<oneshot::Receiver<A::Reply>, SendError>
	where
		A: DeferableReplyHandler<M>,
		M: fmt::Debug + Send + 'static,
	{
		let (envelope, response_rx) = wrap_in_envelope(message);
		match self.inner.tx.try_send_low_priority(envelope) {
			Ok(()) => Ok(response_rx),
			Err(TrySendError::Full(envelope)) => {
				if let Some(backpressure_micros_counter) = backpressure_micros_counter_opt {
					let now = Instant::now();
					self.inner.tx.send_low_priority(envelope).await?;
					let elapsed = now.elapsed();
					backpressure_micros_counter.inc_by(elapsed.as_micros() as u64);
				} else {
					self.inner.tx.send_low_priority(envelope).await?;
				}
				Ok(response_rx)
			},
			Err(TrySendError::Disconnected) => Err(SendError::Disconnected),
		}
	}

	pub fn send_message_with_high_priority<M>(
		&self,
		message: M,
	) -> Result<oneshot::Receiver<A::Reply>, SendError>
	where
		A: DeferableReplyHandler<M>,
		M: fmt::Debug + Send + 'static,
	{
		let (envelope, response_rx) = wrap_in_envelope(message);
		self.inner.tx.send_high_priority(envelope)?;
		Ok(response_rx)
	}

	pub(crate) async fn send_message_with_priority<M>(
		&self,
		message: M,
		priority: Priority,
	) -> Result<oneshot::Receiver<A::Reply>, SendError>
	where
		A: DeferableReplyHandler<M>,
		M: fmt::Debug + Send + 'static,
	{
		let (envelope, response_rx) = wrap_in_envelope(message);
		match priority {
			Priority::High => self.inner.tx.send_high_priority(envelope)?,
			Priority::Low => {
				self.inner.tx.send_low_priority(envelope).await?;
			},
		}
		Ok(response_rx)
	}

	/// Like `send_message`, but awaits the actor's reply.
	///
	/// From inside a handler, prefer `ActorContext::ask`.
	pub async fn ask<M, T>(&self, message: M) -> Result<T, AskError<Infallible>>
	where
		A: DeferableReplyHandler<M, Reply = T>,
		M: fmt::Debug + Send + 'static,
	{
		self.ask_with_backpressure_counter(message, None).await
	}

	/// Like `ask`, additionally attributing the time spent queuing (not
	/// waiting in queue, nor processing) to `backpressure_micros_counter_opt`.
	pub async fn ask_with_backpressure_counter<M, T>(
		&self,
		message: M,
		backpressure_micros_counter_opt: Option<&IntCounter>,
	) -> Result<T, AskError<Infallible>>
	where
		A: DeferableReplyHandler<M, Reply = T>,
		M: fmt::Debug + Send + 'static,
	{
		let resp = self
			.send_message_with_backpressure_counter(message, backpressure_micros_counter_opt)
			.await;
		resp.map_err(|_send_error| AskError::MessageNotDelivered)?
			.await
			.map_err(|_| AskError::ProcessMessageError)
	}

	/// Like `send_message`, but awaits a fallible reply and maps the handler's
	/// error into `AskError::ErrorReply`.
	pub async fn ask_for_res<M, T, E>(&self, message: M) -> Result<T, AskError<E>>
	where
		A: DeferableReplyHandler<M, Reply = Result<T, E>>,
		M: fmt::Debug + Send + 'static,
		E: fmt::Debug,
	{
		self.send_message(message)
			.await
			.map_err(|_send_error| AskError::MessageNotDelivered)?
			.await
			.map_err(|_| AskError::ProcessMessageError)?
			.map_err(AskError::from)
	}
}

pub struct Inbox<A: Actor> {
	rx: Arc<Receiver<Envelope<A>>>,
}

impl<A: Actor> Clone for Inbox<A> {
	fn clone(&self) -> Self {
		Inbox { rx: self.rx.clone() }
	}
}

impl<A: Actor> Inbox<A> {
	pub(crate) fn is_empty(&self) -> bool {
		self.rx.is_empty()
	}

	pub(crate) async fn recv(&self) -> Result<Envelope<A>, RecvError> {
		self.rx.recv().await
	}

	pub(crate) async fn recv_cmd_and_scheduled_msg_only(&self) -> Envelope<A> {
		self.rx.recv_high_priority().await
	}

	pub(crate) fn try_recv(&self) -> Result<Envelope<A>, RecvError> {
		self.rx.try_recv()
	}

	pub async fn recv_typed_message<M: 'static>(&self) -> Option<M> {
		while let Ok(mut envelope) = self.rx.recv().await {
			if let Some(msg) = envelope.message_typed() {
				return Some(msg);
			}
		}
		None
	}

	/// Drains pending low-priority messages. Test-only: the iterator may
	/// never be exhausted while a messagebus is still alive.
	pub fn drain_for_test(&self) -> Vec<Box<dyn Any>> {
		self.rx.drain_low_priority().into_iter().map(|mut envelope| envelope.message()).collect()
	}

	pub fn drain_for_test_typed<M: 'static>(&self) -> Vec<M> {
		self.rx
			.drain_low_priority()
			.into_iter()
			.flat_map(|mut envelope| envelope.message_typed())
			.collect()
	}
}

pub(crate) fn create_messagebus<A: Actor>(
	actor_name: String,
	queue_capacity: QueueCapacity,
	scheduler_client_opt: Option<SchedulerClient>,
) -> (MessageBus<A>, Inbox<A>) {
	let (tx, rx) = crate::channel_with_priority::channel(queue_capacity);
	let ref_count = Arc::new(AtomicUsize::new(1));
	let messagebus = MessageBus {
		inner: Arc::new(Inner {
			tx,
			instance_id: wf_common::new_quid(&actor_name),
			scheduler_client_opt,
		}),
		ref_count,
	};
	let inbox = Inbox { rx: Arc::new(rx) };
	(messagebus, inbox)
}

pub struct WeakMessagebus<A: Actor> {
	inner: Weak<Inner<A>>,
	ref_count: Weak<AtomicUsize>,
}

impl<A: Actor> Clone for WeakMessagebus<A> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone(), ref_count: self.ref_count.clone() }
	}
}

impl<A: Actor> WeakMessagebus<A> {
	pub fn upgrade(&self) -> Option<MessageBus<A>> {
		let inner = self.inner.upgrade()?;
		let ref_count = self.ref_count.upgrade()?;
		Some(MessageBus { inner, ref_count })
	}
}

#[cfg(test)]
mod tests {
	use std::{mem, time::Duration};

	use async_trait::async_trait;

	use super::*;
	use crate::{
		tests::{Ping, PingReceiverActor},
		Runtime,
	};

	#[tokio::test]
	async fn test_weak_messagebus_downgrade_upgrade() {
		let runtime = Runtime::with_accelerated_time();
		let (messagebus, _inbox) = runtime.create_test_messagebus::<PingReceiverActor>();
		let weak_messagebus = messagebus.downgrade();
		assert!(weak_messagebus.upgrade().is_some());
	}

	#[tokio::test]
	async fn test_weak_messagebus_failing_upgrade() {
		let runtime = Runtime::with_accelerated_time();
		let (messagebus, _inbox) = runtime.create_test_messagebus::<PingReceiverActor>();
		let weak_messagebus = messagebus.downgrade();
		drop(messagebus);
		assert!(weak_messagebus.upgrade().is_none());
	}

	struct BackPressureActor;

	impl Actor for BackPressureActor {
		type ObservableState = ();

		fn observable_state(&self) -> Self::ObservableState {}

		fn queue_capacity(&self) -> QueueCapacity {
			QueueCapacity::Bounded(0)
		}

		fn yield_after_each_message(&self) -> bool {
			false
		}
	}

	#[async_trait]
	impl Handler<Duration> for BackPressureActor {
		type Reply = ();

		async fn handle(
			&mut self,
			sleep_duration: Duration,
			_ctx: &ActorContext<Self>,
		) -> Result<(), ActorExitStatus> {
			if !sleep_duration.is_zero() {
				tokio::time::sleep(sleep_duration).await;
			}
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_messagebus_send_with_backpressure_counter_low_backpressure() {
		let runtime = Runtime::with_accelerated_time();
		let back_pressure_actor = BackPressureActor;
		let (messagebus, _handle) = runtime.spawn_builder().spawn(back_pressure_actor);
		messagebus.ask_with_backpressure_counter(Duration::default(), None).await.unwrap();
		let backpressure_micros_counter =
			IntCounter::new("test_counter", "help for test_counter").unwrap();
		let wait_duration = Duration::from_millis(1);
		let processed = messagebus
			.send_message_with_backpressure_counter(wait_duration, Some(&backpressure_micros_counter))
			.await
			.unwrap();
		assert!(backpressure_micros_counter.get() < 500);
		processed.await.unwrap();
		assert!(backpressure_micros_counter.get() < 500);
		runtime.assert_quit().await;
	}

	#[tokio::test]
	async fn test_messagebus_send_with_backpressure_counter_backpressure() {
		let runtime = Runtime::with_accelerated_time();
		let back_pressure_actor = BackPressureActor;
		let (messagebus, _handle) = runtime.spawn_builder().spawn(back_pressure_actor);
		messagebus.ask_with_backpressure_counter(Duration::default(), None).await.unwrap();
		let backpressure_micros_counter =
			IntCounter::new("test_counter", "help for test_counter").unwrap();
		let wait_duration = Duration::from_millis(1);
		messagebus
			.send_message_with_backpressure_counter(wait_duration, Some(&backpressure_micros_counter))
			.await
			.unwrap();
		// The second message experiences backpressure: capacity is 0 and the
		// first message takes 1ms to process.
		messagebus
			.send_message_with_backpressure_counter(Duration::default(), Some(&backpressure_micros_counter))
			.await
			.unwrap();
		assert!(backpressure_micros_counter.get() > 1_000u64);
		runtime.assert_quit().await;
	}

	#[tokio::test]
	async fn test_messagebus_waiting_for_processing_does_not_count_as_backpressure() {
		let runtime = Runtime::with_accelerated_time();
		let back_pressure_actor = BackPressureActor;
		let (messagebus, _handle) = runtime.spawn_builder().spawn(back_pressure_actor);
		messagebus.ask_with_backpressure_counter(Duration::default(), None).await.unwrap();
		let backpressure_micros_counter =
			IntCounter::new("test_counter", "help for test_counter").unwrap();
		let start = Instant::now();
		messagebus.ask_with_backpressure_counter(Duration::from_millis(1), None).await.unwrap();
		let elapsed = start.elapsed();
		assert!(elapsed.as_micros() > 1000);
		assert_eq!(backpressure_micros_counter.get(), 0);
		runtime.assert_quit().await;
	}

	#[tokio::test]
	async fn test_try_send() {
		let runtime = Runtime::with_accelerated_time();
		let (messagebus, _inbox) =
			runtime.create_messagebus::<PingReceiverActor>("hello".to_string(), QueueCapacity::Bounded(1));
		assert!(messagebus.try_send_message(Ping).is_ok());
		assert!(matches!(messagebus.try_send_message(Ping).unwrap_err(), TrySendError::Full(Ping)));
	}

	#[tokio::test]
	async fn test_try_send_disconnect() {
		let runtime = Runtime::with_accelerated_time();
		let (messagebus, inbox) =
			runtime.create_messagebus::<PingReceiverActor>("hello".to_string(), QueueCapacity::Bounded(1));
		assert!(messagebus.try_send_message(Ping).is_ok());
		mem::drop(inbox);
		assert!(matches!(messagebus.try_send_message(Ping).unwrap_err(), TrySendError::Disconnected));
	}
}
