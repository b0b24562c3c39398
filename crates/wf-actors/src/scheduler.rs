//! Lets tests run actor schedules (timers, saga step deadlines, heartbeats) at
//! effectively infinite speed. `accelerate_time` pauses tokio's clock for the
//! current runtime; paused time auto-advances to the next pending timer once
//! every task is blocked on one, so `SchedulerClient::sleep` needs no special
//! handling of its own — it is always a plain `tokio::time::sleep`.

use std::sync::{
	atomic::{AtomicBool, AtomicUsize, Ordering},
	Arc,
};
use std::time::Duration;

struct Inner {
	accelerated: AtomicBool,
	no_advance_zones: AtomicUsize,
}

/// A handle actors use to sleep and schedule timers through the runtime's
/// notion of time, real or accelerated.
#[derive(Clone)]
pub struct SchedulerClient {
	inner: Arc<Inner>,
}

impl SchedulerClient {
	pub fn is_accelerated(&self) -> bool {
		self.inner.accelerated.load(Ordering::Relaxed)
	}

	/// Pauses the current tokio runtime's clock. Test-only: requires a
	/// current-thread runtime (as `#[tokio::test]` provides by default).
	#[cfg(any(test, feature = "testsuite"))]
	pub fn accelerate_time(&self) {
		if !self.inner.accelerated.swap(true, Ordering::Relaxed) {
			tokio::time::pause();
		}
	}

	/// Sleeps for `duration`, measured by the runtime's (possibly paused) clock.
	pub async fn sleep(&self, duration: Duration) {
		tokio::time::sleep(duration).await;
	}

	/// Runs `callback` after `after_duration`. Used for self-scheduled timers
	/// (a saga's step-timeout deadline, a process's `after(duration)` transition).
	pub fn schedule_event<F>(&self, callback: F, after_duration: Duration)
	where F: FnOnce() + Send + 'static {
		tokio::spawn(async move {
			tokio::time::sleep(after_duration).await;
			callback();
		});
	}

	/// Marks a span during which the actor loop is doing work that should not
	/// be mistaken for idle time (actor initialization and finalization).
	pub fn no_advance_time_guard(&self) -> NoAdvanceTimeGuard {
		self.inner.no_advance_zones.fetch_add(1, Ordering::Relaxed);
		NoAdvanceTimeGuard { inner: self.inner.clone() }
	}

	#[cfg(any(test, feature = "testsuite"))]
	pub fn num_no_advance_time_zones(&self) -> usize {
		self.inner.no_advance_zones.load(Ordering::Relaxed)
	}
}

/// RAII guard returned by `SchedulerClient::no_advance_time_guard`.
pub struct NoAdvanceTimeGuard {
	inner: Arc<Inner>,
}

impl Drop for NoAdvanceTimeGuard {
	fn drop(&mut self) {
		self.inner.no_advance_zones.fetch_sub(1, Ordering::Relaxed);
	}
}

/// Spawns the scheduler, returning a client shared by every actor in the runtime.
pub fn start_scheduler() -> SchedulerClient {
	SchedulerClient {
		inner: Arc::new(Inner { accelerated: AtomicBool::new(false), no_advance_zones: AtomicUsize::new(0) }),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn real_time_sleep_waits_out_duration() {
		let scheduler = start_scheduler();
		let start = tokio::time::Instant::now();
		scheduler.sleep(Duration::from_millis(20)).await;
		assert!(start.elapsed() >= Duration::from_millis(20));
	}

	#[tokio::test]
	async fn accelerated_sleep_resolves_without_waiting_out_wall_clock() {
		let scheduler = start_scheduler();
		scheduler.accelerate_time();
		let start = std::time::Instant::now();
		scheduler.sleep(Duration::from_secs(3600)).await;
		assert!(start.elapsed() < Duration::from_secs(1));
	}

	#[test]
	fn no_advance_time_guard_tracks_nesting() {
		let scheduler = start_scheduler();
		assert_eq!(scheduler.num_no_advance_time_zones(), 0);
		let guard_a = scheduler.no_advance_time_guard();
		let guard_b = scheduler.no_advance_time_guard();
		assert_eq!(scheduler.num_no_advance_time_zones(), 2);
		drop(guard_a);
		assert_eq!(scheduler.num_no_advance_time_zones(), 1);
		drop(guard_b);
		assert_eq!(scheduler.num_no_advance_time_zones(), 0);
	}
}
