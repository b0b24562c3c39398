use wf_store::Event;

/// A named consistency property checked over a full or partial event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyCheck {
	Causal,
	Sequential,
	Eventual,
	Strong,
}

/// Evaluates `check` over `events`. `events` is treated as one actor's log
/// when checking `Sequential`/`Strong`; `Causal` looks up dependencies by
/// `event_id` across the whole slice, regardless of actor.
pub fn check(kind: ConsistencyCheck, events: &[Event]) -> bool {
	match kind {
		ConsistencyCheck::Causal => causal_holds(events),
		ConsistencyCheck::Sequential => sequential_holds(events),
		ConsistencyCheck::Eventual => true,
		ConsistencyCheck::Strong => causal_holds(events) && sequential_holds(events),
	}
}

/// Every event's `causalDependencies` must each name an event with an
/// earlier-or-equal timestamp. A dependency absent from `events` is treated
/// as already applied (can't be checked from this slice, doesn't violate).
fn causal_holds(events: &[Event]) -> bool {
	let by_id: std::collections::HashMap<&str, &Event> =
		events.iter().map(|event| (event.event_id.as_str(), event)).collect();
	events.iter().all(|event| {
		event.causal_dependencies.iter().all(|dep_id| {
			by_id.get(dep_id.as_str()).map_or(true, |dep_event| dep_event.timestamp <= event.timestamp)
		})
	})
}

/// Per actor, versions observed must be a gap-free ascending run starting
/// wherever the slice starts (no assumption that version 1 is present).
fn sequential_holds(events: &[Event]) -> bool {
	let mut by_actor: std::collections::HashMap<&str, Vec<u64>> = std::collections::HashMap::new();
	for event in events {
		by_actor.entry(event.actor_id.as_str()).or_default().push(event.version);
	}
	by_actor.values().all(|versions| {
		let mut sorted = versions.clone();
		sorted.sort_unstable();
		sorted.windows(2).all(|pair| pair[1] == pair[0] + 1)
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use wf_store::VectorClock;

	fn event(id: &str, actor: &str, version: u64, ts: i64, deps: &[&str]) -> Event {
		Event {
			event_id: id.to_string(),
			actor_id: actor.to_string(),
			event_type: "tick".to_string(),
			payload: serde_json::json!({}),
			version,
			timestamp: ts,
			causal_dependencies: deps.iter().map(|s| s.to_string()).collect(),
			vector_clock: VectorClock::new(),
		}
	}

	#[test]
	fn eventual_always_holds() {
		assert!(check(ConsistencyCheck::Eventual, &[]));
	}

	#[test]
	fn sequential_detects_gap() {
		let events = vec![event("e1", "a1", 1, 1, &[]), event("e2", "a1", 3, 2, &[])];
		assert!(!check(ConsistencyCheck::Sequential, &events));
	}

	#[test]
	fn sequential_holds_for_gap_free_run() {
		let events = vec![event("e1", "a1", 1, 1, &[]), event("e2", "a1", 2, 2, &[])];
		assert!(check(ConsistencyCheck::Sequential, &events));
	}

	#[test]
	fn causal_detects_out_of_order_dependency() {
		let events = vec![event("e1", "a1", 1, 20, &[]), event("e2", "a1", 2, 10, &["e1"])];
		assert!(!check(ConsistencyCheck::Causal, &events));
	}

	#[test]
	fn strong_requires_both() {
		let events = vec![event("e1", "a1", 1, 10, &[]), event("e2", "a1", 2, 20, &["e1"])];
		assert!(check(ConsistencyCheck::Strong, &events));
	}
}
