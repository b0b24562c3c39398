//! A two-lane channel: a high-priority lane for supervisor commands and an
//! optionally-bounded low-priority lane for regular actor messages. `recv`
//! always prefers the high-priority lane, mirroring a UNIX scheduler giving
//! signals precedence over regular work.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use tokio::sync::{mpsc, Mutex as TokioMutex};

pub use crate::actor::QueueCapacity;

#[derive(Debug)]
pub enum TrySendError<T> {
	Full(T),
	Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
	#[error("the actor has already exited")]
	Disconnected,
}

impl<T> From<mpsc::error::SendError<T>> for SendError {
	fn from(_: mpsc::error::SendError<T>) -> Self {
		SendError::Disconnected
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
	Disconnected,
}

enum LowSender<T> {
	Bounded(mpsc::Sender<T>),
	Unbounded(mpsc::UnboundedSender<T>),
}

enum LowReceiver<T> {
	Bounded(mpsc::Receiver<T>),
	Unbounded(mpsc::UnboundedReceiver<T>),
}

struct Shared {
	pending: AtomicUsize,
}

pub struct Sender<T> {
	high_tx: mpsc::UnboundedSender<T>,
	low_tx: LowSender<T>,
	shared: Arc<Shared>,
}

impl<T> Clone for Sender<T> {
	fn clone(&self) -> Self {
		Sender {
			high_tx: self.high_tx.clone(),
			low_tx: match &self.low_tx {
				LowSender::Bounded(tx) => LowSender::Bounded(tx.clone()),
				LowSender::Unbounded(tx) => LowSender::Unbounded(tx.clone()),
			},
			shared: self.shared.clone(),
		}
	}
}

impl<T> Sender<T> {
	pub fn is_disconnected(&self) -> bool {
		self.high_tx.is_closed()
	}

	pub fn send_high_priority(&self, msg: T) -> Result<(), SendError> {
		self.shared.pending.fetch_add(1, Ordering::Relaxed);
		self.high_tx.send(msg).map_err(|err| {
			self.shared.pending.fetch_sub(1, Ordering::Relaxed);
			SendError::from(err)
		})
	}

	pub fn try_send_low_priority(&self, msg: T) -> Result<(), TrySendError<T>> {
		match &self.low_tx {
			LowSender::Bounded(tx) => tx.try_send(msg).map_err(|err| match err {
				mpsc::error::TrySendError::Full(msg) => TrySendError::Full(msg),
				mpsc::error::TrySendError::Closed(msg) => {
					let _ = msg;
					TrySendError::Disconnected
				},
			}),
			LowSender::Unbounded(tx) => tx.send(msg).map_err(|_| TrySendError::Disconnected),
		}
		.map(|()| {
			self.shared.pending.fetch_add(1, Ordering::Relaxed);
		})
	}

	pub async fn send_low_priority(&self, msg: T) -> Result<(), SendError> {
		let result = match &self.low_tx {
			LowSender::Bounded(tx) => tx.send(msg).await.map_err(SendError::from),
			LowSender::Unbounded(tx) => tx.send(msg).map_err(SendError::from),
		};
		if result.is_ok() {
			self.shared.pending.fetch_add(1, Ordering::Relaxed);
		}
		result
	}
}

pub struct Receiver<T> {
	high_rx: TokioMutex<mpsc::UnboundedReceiver<T>>,
	low_rx: TokioMutex<LowReceiver<T>>,
	shared: Arc<Shared>,
}

impl<T> Receiver<T> {
	pub fn is_empty(&self) -> bool {
		self.shared.pending.load(Ordering::Relaxed) == 0
	}

	fn dec(&self) {
		self.shared.pending.fetch_sub(1, Ordering::Relaxed);
	}

	/// Receives the next message, high-priority lane first.
	pub async fn recv(&self) -> Result<T, RecvError> {
		let mut high = self.high_rx.lock().await;
		let mut low = self.low_rx.lock().await;
		tokio::select! {
			biased;
			msg = high.recv() => {
				match msg {
					Some(msg) => { drop(high); drop(low); self.dec(); Ok(msg) }
					None => {
						// The high-priority lane closes together with the low-priority
						// one; give the low lane one last non-blocking chance to drain
						// before declaring the channel disconnected.
						match recv_low_try(&mut low) {
							Some(msg) => { self.dec(); Ok(msg) }
							None => Err(RecvError::Disconnected),
						}
					}
				}
			}
			msg = recv_low_fut(&mut low) => {
				match msg {
					Some(msg) => { self.dec(); Ok(msg) }
					None => Err(RecvError::Disconnected),
				}
			}
		}
	}

	/// Receives only from the high-priority lane. Used while the actor is paused.
	pub async fn recv_high_priority(&self) -> T {
		let mut high = self.high_rx.lock().await;
		loop {
			if let Some(msg) = high.recv().await {
				self.dec();
				return msg;
			}
			// Disconnected with nothing left: park forever rather than busy-loop;
			// the actor loop observes this only after its terminate signal fired.
			std::future::pending::<()>().await;
		}
	}

	pub fn try_recv(&self) -> Result<T, RecvError> {
		if let Ok(mut high) = self.high_rx.try_lock() {
			if let Ok(msg) = high.try_recv() {
				self.dec();
				return Ok(msg);
			}
		}
		if let Ok(mut low) = self.low_rx.try_lock() {
			if let Some(msg) = recv_low_try(&mut low) {
				self.dec();
				return Ok(msg);
			}
		}
		Err(RecvError::Disconnected)
	}

	/// Drains every message currently queued in the low-priority lane.
	/// For tests only: leaves the high-priority lane untouched.
	pub fn drain_low_priority(&self) -> Vec<T> {
		let mut drained = Vec::new();
		if let Ok(mut low) = self.low_rx.try_lock() {
			while let Some(msg) = recv_low_try(&mut low) {
				self.dec();
				drained.push(msg);
			}
		}
		drained
	}
}

fn recv_low_try<T>(low: &mut LowReceiver<T>) -> Option<T> {
	match low {
		LowReceiver::Bounded(rx) => rx.try_recv().ok(),
		LowReceiver::Unbounded(rx) => rx.try_recv().ok(),
	}
}

async fn recv_low_fut<T>(low: &mut LowReceiver<T>) -> Option<T> {
	match low {
		LowReceiver::Bounded(rx) => rx.recv().await,
		LowReceiver::Unbounded(rx) => rx.recv().await,
	}
}

pub fn channel<T>(queue_capacity: QueueCapacity) -> (Sender<T>, Receiver<T>) {
	let (high_tx, high_rx) = mpsc::unbounded_channel();
	let (low_tx, low_rx) = match queue_capacity {
		QueueCapacity::Unbounded => {
			let (tx, rx) = mpsc::unbounded_channel();
			(LowSender::Unbounded(tx), LowReceiver::Unbounded(rx))
		},
		QueueCapacity::Bounded(capacity) => {
			let (tx, rx) = mpsc::channel(capacity.max(1));
			(LowSender::Bounded(tx), LowReceiver::Bounded(rx))
		},
	};
	let shared = Arc::new(Shared { pending: AtomicUsize::new(0) });
	let sender = Sender { high_tx, low_tx, shared: shared.clone() };
	let receiver = Receiver {
		high_rx: TokioMutex::new(high_rx),
		low_rx: TokioMutex::new(low_rx),
		shared,
	};
	(sender, receiver)
}
