use std::{
	collections::{HashMap, VecDeque},
	fmt,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex, Weak,
	},
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use tokio::sync::Mutex as TokioMutex;
use tracing::warn;

use crate::type_map::TMap;

/// Marker trait for values that can flow through the [`EventBroker`].
pub trait Event: fmt::Debug + Clone + Send + Sync + 'static {}

#[async_trait]
pub trait EventSubscriber<E>: Send + Sync + 'static {
	async fn handle_event(&mut self, event: E);
}

#[async_trait]
impl<E, F> EventSubscriber<E> for F
where
	E: Event,
	F: Fn(E) + Send + Sync + 'static,
{
	async fn handle_event(&mut self, event: E) {
		(self)(event);
	}
}

type EventSubscriptions<E> = HashMap<usize, EventSubscription<E>>;
type EventRingBuffer<E> = VecDeque<Buffered<E>>;

#[derive(Debug, Clone)]
struct Buffered<E> {
	event: E,
	millis_since_epoch: u128,
}

fn now_millis() -> u128 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis()
}

/// In-process, per-type pub/sub fabric with a bounded catch-up buffer.
///
/// `publish` both notifies live subscribers of the event's type and appends
/// the event to that type's ring buffer, evicting the oldest entry once the
/// buffer is full. `buffered_since` lets a subscriber that connected late
/// recover the events it missed without replaying the entire event store.
#[derive(Debug, Clone)]
pub struct EventBroker {
	inner: Arc<InnerEventBroker>,
}

#[derive(Debug)]
struct InnerEventBroker {
	subscription_sequence: AtomicUsize,
	subscriptions: Mutex<TMap>,
	buffers: Mutex<TMap>,
	buffer_capacity: usize,
}

impl Default for EventBroker {
	fn default() -> Self {
		Self::new(1_024)
	}
}

impl EventBroker {
	pub fn new(buffer_capacity: usize) -> Self {
		Self {
			inner: Arc::new(InnerEventBroker {
				subscription_sequence: AtomicUsize::new(0),
				subscriptions: Mutex::default(),
				buffers: Mutex::default(),
				buffer_capacity: buffer_capacity.max(1),
			}),
		}
	}

	/// Subscribes to an event type.
	#[must_use]
	pub fn subscribe<E>(&self, subscriber: impl EventSubscriber<E>) -> EventSubscriptionHandle
	where
		E: Event,
	{
		let mut subscriptions =
			self.inner.subscriptions.lock().expect("lock should not be poisoned");

		if !subscriptions.contains::<EventSubscriptions<E>>() {
			subscriptions.insert::<EventSubscriptions<E>>(HashMap::new());
		}
		let subscription_id = self.inner.subscription_sequence.fetch_add(1, Ordering::Relaxed);

		let subscription =
			EventSubscription { subscriber: Arc::new(TokioMutex::new(Box::new(subscriber))) };
		let typed_subscriptions = subscriptions
			.get_mut::<EventSubscriptions<E>>()
			.expect("subscription map should exist");
		typed_subscriptions.insert(subscription_id, subscription);

		EventSubscriptionHandle {
			subscription_id,
			broker: Arc::downgrade(&self.inner),
			drop_me: |subscription_id, broker| {
				let mut subscriptions =
					broker.subscriptions.lock().expect("lock should not be poisoned");
				if let Some(typed_subscriptions) = subscriptions.get_mut::<EventSubscriptions<E>>()
				{
					typed_subscriptions.remove(&subscription_id);
				}
			},
		}
	}

	/// Publishes an event: buffers it for catch-up, then fans it out to every
	/// live subscriber of its type.
	pub fn publish<E>(&self, event: E)
	where
		E: Event,
	{
		self.buffer(event.clone());

		let subscriptions = self.inner.subscriptions.lock().expect("lock should not be poisoned");
		if let Some(typed_subscriptions) = subscriptions.get::<EventSubscriptions<E>>() {
			for subscription in typed_subscriptions.values() {
				let event = event.clone();
				let subscriber_clone = subscription.subscriber.clone();
				let handle_event_fut = async move {
					if tokio::time::timeout(Duration::from_secs(1), async {
						subscriber_clone.lock().await.handle_event(event).await
					})
					.await
					.is_err()
					{
						warn!("`{}` event handler timed out", std::any::type_name::<E>());
					}
				};
				tokio::spawn(handle_event_fut);
			}
		}
	}

	fn buffer<E>(&self, event: E)
	where
		E: Event,
	{
		let mut buffers = self.inner.buffers.lock().expect("lock should not be poisoned");
		if !buffers.contains::<EventRingBuffer<E>>() {
			buffers.insert::<EventRingBuffer<E>>(VecDeque::new());
		}
		let ring = buffers.get_mut::<EventRingBuffer<E>>().expect("ring buffer should exist");
		if ring.len() >= self.inner.buffer_capacity {
			ring.pop_front();
		}
		ring.push_back(Buffered { event, millis_since_epoch: now_millis() });
	}

	/// Returns every buffered event of type `E` published at or after `since`
	/// (milliseconds since the Unix epoch), oldest first.
	pub fn buffered_since<E>(&self, since: u128) -> Vec<E>
	where
		E: Event,
	{
		let buffers = self.inner.buffers.lock().expect("lock should not be poisoned");
		let Some(ring) = buffers.get::<EventRingBuffer<E>>() else {
			return Vec::new();
		};
		ring.iter()
			.filter(|buffered| buffered.millis_since_epoch >= since)
			.map(|buffered| buffered.event.clone())
			.collect()
	}
}

struct EventSubscription<E> {
	subscriber: Arc<TokioMutex<Box<dyn EventSubscriber<E>>>>,
}

#[derive(Clone)]
pub struct EventSubscriptionHandle {
	subscription_id: usize,
	broker: Weak<InnerEventBroker>,
	drop_me: fn(usize, &InnerEventBroker),
}

impl EventSubscriptionHandle {
	pub fn cancel(self) {}

	/// By default, dropping a subscription handle cancels the subscription.
	/// `forever` consumes the handle and avoids cancelling the subscription on drop.
	pub fn forever(mut self) {
		self.broker = Weak::new();
	}
}

impl Drop for EventSubscriptionHandle {
	fn drop(&mut self) {
		if let Some(broker) = self.broker.upgrade() {
			(self.drop_me)(self.subscription_id, &broker);
		}
	}
}

#[cfg(test)]
mod tests {

	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	};

	use super::*;

	#[derive(Debug, Clone)]
	struct MyEvent {
		value: usize,
	}

	impl Event for MyEvent {}

	#[derive(Debug, Clone)]
	struct MySubscriber {
		counter: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl EventSubscriber<MyEvent> for MySubscriber {
		async fn handle_event(&mut self, event: MyEvent) {
			self.counter.store(event.value, Ordering::Relaxed);
		}
	}

	#[tokio::test]
	async fn subscriber_receives_published_event() {
		let broker = EventBroker::default();
		let counter = Arc::new(AtomicUsize::new(0));
		let subscriber = MySubscriber { counter: counter.clone() };
		let handle = broker.subscribe(subscriber);

		broker.publish(MyEvent { value: 42 });
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert_eq!(counter.load(Ordering::Relaxed), 42);

		handle.cancel();
		broker.publish(MyEvent { value: 1337 });
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert_eq!(counter.load(Ordering::Relaxed), 42);
	}

	#[tokio::test]
	async fn handle_forever_keeps_subscription_alive() {
		let broker = EventBroker::default();
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		broker
			.subscribe(move |event: MyEvent| {
				tx.send(event.value).unwrap();
			})
			.forever();
		broker.publish(MyEvent { value: 42 });
		assert_eq!(rx.recv().await, Some(42));
	}

	#[tokio::test]
	async fn buffer_evicts_oldest_past_capacity() {
		let broker = EventBroker::new(2);
		broker.publish(MyEvent { value: 1 });
		broker.publish(MyEvent { value: 2 });
		broker.publish(MyEvent { value: 3 });

		let buffered = broker.buffered_since::<MyEvent>(0);
		assert_eq!(buffered.iter().map(|e| e.value).collect::<Vec<_>>(), vec![2, 3]);
	}

	#[tokio::test]
	async fn buffered_since_filters_by_timestamp() {
		let broker = EventBroker::default();
		broker.publish(MyEvent { value: 1 });
		let cutoff = now_millis() + 1;
		tokio::time::sleep(Duration::from_millis(5)).await;
		broker.publish(MyEvent { value: 2 });

		let buffered = broker.buffered_since::<MyEvent>(cutoff);
		assert_eq!(buffered.iter().map(|e| e.value).collect::<Vec<_>>(), vec![2]);
	}
}
