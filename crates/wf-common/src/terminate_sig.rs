use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex, Weak,
};

use tracing::debug;

/// A hierarchical kill switch: killing a signal kills every child signal
/// derived from it, but a child killing itself never propagates upward.
///
/// Used to cascade actor shutdown (supervisor -> actor -> spawned children)
/// and to unwind transport connections when a tenant's runtime is torn down.
#[derive(Clone, Default)]
pub struct TerminateSignal {
	inner: Arc<Inner>,
}

struct Inner {
	alive: AtomicBool,
	children: Mutex<Vec<Weak<Inner>>>,
}

impl Default for Inner {
	fn default() -> Self {
		Self { alive: AtomicBool::new(true), children: Mutex::default() }
	}
}

fn garbage_collect(children: &mut Vec<Weak<Inner>>) {
	let mut i = 0;
	while i < children.len() {
		if Weak::strong_count(&children[i]) == 0 {
			children.swap_remove(i);
		} else {
			i += 1;
		}
	}
}

impl TerminateSignal {
	pub fn is_alive(&self) -> bool {
		self.inner.alive.load(Ordering::Relaxed)
	}

	pub fn is_dead(&self) -> bool {
		!self.is_alive()
	}

	pub fn kill(&self) {
		self.inner.kill();
	}

	/// Creates a child signal. If the parent is already dead, the child is
	/// born dead.
	pub fn child(&self) -> TerminateSignal {
		let mut lock = self.inner.children.lock().unwrap();
		let child_inner = Inner { alive: AtomicBool::new(self.is_alive()), ..Default::default() };
		garbage_collect(&mut lock);
		let child_inner_arc = Arc::new(child_inner);
		lock.push(Arc::downgrade(&child_inner_arc));
		TerminateSignal { inner: child_inner_arc }
	}
}

impl Inner {
	pub fn kill(&self) {
		debug!("kill-switch activated");
		self.alive.store(false, Ordering::Relaxed);
		let mut lock = self.children.lock().unwrap();
		for weak in lock.drain(..) {
			if let Some(inner) = weak.upgrade() {
				inner.kill();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::TerminateSignal;

	#[test]
	fn kill_is_idempotent() {
		let sig = TerminateSignal::default();
		assert!(sig.is_alive());
		sig.kill();
		assert!(sig.is_dead());
		sig.kill();
		assert!(sig.is_dead());
	}

	#[test]
	fn kill_propagates_to_children() {
		let sig = TerminateSignal::default();
		let child_a = sig.child();
		let child_b = sig.child();
		assert!(child_a.is_alive());
		assert!(child_b.is_alive());
		sig.kill();
		assert!(child_a.is_dead());
		assert!(child_b.is_dead());
	}

	#[test]
	fn kill_propagates_to_grandchildren() {
		let sig = TerminateSignal::default();
		let child = sig.child();
		let grandchild = child.child();
		sig.kill();
		assert!(child.is_dead());
		assert!(grandchild.is_dead());
	}

	#[test]
	fn child_kill_does_not_propagate_upward() {
		let sig = TerminateSignal::default();
		let child = sig.child();
		child.kill();
		assert!(sig.is_alive());
		assert!(child.is_dead());
	}
}
