use std::sync::{
	atomic::{AtomicU64, AtomicUsize, Ordering},
	Arc,
};

/// Tracks the last time an actor recorded forward progress, plus a count of
/// in-flight "protected zones" (I/O awaits that should not be mistaken for a
/// stuck actor by a supervisor's heartbeat sweep).
#[derive(Clone, Default)]
pub struct Progress {
	inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
	tick: AtomicU64,
	protected_zones: AtomicUsize,
}

impl Progress {
	/// Records that the actor did something observable since the last check.
	pub fn record_progress(&self) {
		self.inner.tick.fetch_add(1, Ordering::Relaxed);
	}

	/// A monotonically increasing counter; a supervisor considers the actor
	/// alive if this value changed since the last heartbeat, or if a
	/// protected zone is currently held.
	pub fn tick(&self) -> u64 {
		self.inner.tick.load(Ordering::Relaxed)
	}

	pub fn num_protected_zones(&self) -> usize {
		self.inner.protected_zones.load(Ordering::Relaxed)
	}

	/// Enters a protected zone: the actor is awaiting an external effect
	/// (event store I/O, a downstream `ask`) and should not be flagged as
	/// stuck for the guard's lifetime, even if its progress tick does not
	/// advance.
	pub fn protect_zone(&self) -> ProtectedZoneGuard {
		self.inner.protected_zones.fetch_add(1, Ordering::Relaxed);
		ProtectedZoneGuard { progress: self.clone() }
	}
}

pub struct ProtectedZoneGuard {
	progress: Progress,
}

impl Drop for ProtectedZoneGuard {
	fn drop(&mut self) {
		self.progress.inner.protected_zones.fetch_sub(1, Ordering::Relaxed);
		self.progress.record_progress();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn record_progress_advances_tick() {
		let progress = Progress::default();
		let before = progress.tick();
		progress.record_progress();
		assert!(progress.tick() > before);
	}

	#[test]
	fn protected_zone_guard_tracks_nesting() {
		let progress = Progress::default();
		assert_eq!(progress.num_protected_zones(), 0);
		let guard_a = progress.protect_zone();
		let guard_b = progress.protect_zone();
		assert_eq!(progress.num_protected_zones(), 2);
		drop(guard_a);
		assert_eq!(progress.num_protected_zones(), 1);
		drop(guard_b);
		assert_eq!(progress.num_protected_zones(), 0);
	}
}
