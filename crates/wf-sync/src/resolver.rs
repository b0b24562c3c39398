use wf_common::new_quid;
use wf_store::{compare_vector_clocks, ClockOrdering, Event};

/// Named resolution strategy, selected per actor/process at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
	LastWriteWins,
	CausalOrder,
	Merge,
}

/// True when `a` and `b` are the kind of pair the resolver is meant to settle:
/// same actor, same event type, and neither vector-clock-precedes the other.
pub fn conflicts(a: &Event, b: &Event) -> bool {
	a.actor_id == b.actor_id
		&& a.event_type == b.event_type
		&& compare_vector_clocks(&a.vector_clock, &b.vector_clock) == ClockOrdering::Concurrent
}

/// Resolves a non-empty set of mutually concurrent events down to one,
/// deterministically: calling this twice on the same input (and strategy)
/// always returns an event with identical `event_id`, `payload`, and
/// `vector_clock`.
pub fn resolve(strategy: ResolutionStrategy, events: &[Event]) -> Option<Event> {
	match events {
		[] => None,
		[only] => Some(only.clone()),
		many => Some(match strategy {
			ResolutionStrategy::LastWriteWins => last_write_wins(many).clone(),
			ResolutionStrategy::CausalOrder => causal_order(many).clone(),
			ResolutionStrategy::Merge => merge(many),
		}),
	}
}

fn last_write_wins(events: &[Event]) -> &Event {
	events
		.iter()
		.max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.event_id.cmp(&b.event_id)))
		.expect("events is non-empty")
}

/// Topologically orders by `causalDependencies` and returns the unique
/// minimum (an event no other event in the set depends on). Falls back to
/// `lastWriteWins` when more than one event qualifies as minimal.
fn causal_order(events: &[Event]) -> &Event {
	let depended_on: std::collections::HashSet<&str> =
		events.iter().flat_map(|event| event.causal_dependencies.iter().map(String::as_str)).collect();

	let minimal: Vec<&Event> =
		events.iter().filter(|event| !depended_on.contains(event.event_id.as_str())).collect();

	match minimal.as_slice() {
		[one] => one,
		_ => last_write_wins(events),
	}
}

/// Field-by-field last-writer-wins merge: for every key present in any
/// input's payload object, keeps the value from whichever event has the
/// greatest `timestamp`. Non-object payloads fall back to `lastWriteWins`
/// wholesale, since there are no fields to fold.
fn merge(events: &[Event]) -> Event {
	let all_objects = events.iter().all(|event| event.payload.is_object());
	let payload = if all_objects {
		let mut merged = serde_json::Map::new();
		let mut field_timestamps: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
		for event in events {
			let object = event.payload.as_object().expect("checked above");
			for (key, value) in object {
				let incumbent = field_timestamps.get(key).copied().unwrap_or(i64::MIN);
				if event.timestamp >= incumbent {
					field_timestamps.insert(key.clone(), event.timestamp);
					merged.insert(key.clone(), value.clone());
				}
			}
		}
		serde_json::Value::Object(merged)
	} else {
		return last_write_wins(events).clone();
	};

	let mut causal_dependencies: Vec<String> =
		events.iter().flat_map(|event| event.causal_dependencies.iter().cloned()).collect();
	causal_dependencies.sort();
	causal_dependencies.dedup();

	let mut vector_clock = events[0].vector_clock.clone();
	for event in &events[1..] {
		vector_clock = wf_store::merge_vector_clocks(&vector_clock, &event.vector_clock);
	}

	let actor_id = events[0].actor_id.clone();
	let event_type = events[0].event_type.clone();
	Event {
		event_id: new_quid("evt"),
		actor_id,
		event_type,
		payload,
		version: events.iter().map(|event| event.version).max().unwrap_or(0),
		timestamp: wf_store::now_millis(),
		causal_dependencies,
		vector_clock,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wf_store::VectorClock;

	fn event(id: &str, actor: &str, ty: &str, ts: i64, clock: &[(&str, u64)]) -> Event {
		let mut vector_clock = VectorClock::new();
		for (node, count) in clock {
			vector_clock.insert((*node).to_string(), *count);
		}
		Event {
			event_id: id.to_string(),
			actor_id: actor.to_string(),
			event_type: ty.to_string(),
			payload: serde_json::json!({}),
			version: 1,
			timestamp: ts,
			causal_dependencies: vec![],
			vector_clock,
		}
	}

	#[test]
	fn concurrent_same_type_events_conflict() {
		let a = event("e1", "a1", "renamed", 10, &[("n1", 1)]);
		let b = event("e2", "a1", "renamed", 11, &[("n2", 1)]);
		assert!(conflicts(&a, &b));
	}

	#[test]
	fn causally_ordered_events_do_not_conflict() {
		let a = event("e1", "a1", "renamed", 10, &[("n1", 1)]);
		let b = event("e2", "a1", "renamed", 11, &[("n1", 2)]);
		assert!(!conflicts(&a, &b));
	}

	#[test]
	fn last_write_wins_picks_greatest_timestamp_then_id() {
		let a = event("e2", "a1", "renamed", 10, &[("n1", 1)]);
		let b = event("e1", "a1", "renamed", 10, &[("n2", 1)]);
		let winner = resolve(ResolutionStrategy::LastWriteWins, &[a.clone(), b.clone()]).unwrap();
		assert_eq!(winner.event_id, "e2");
	}

	#[test]
	fn resolve_is_deterministic() {
		let a = event("e1", "a1", "renamed", 10, &[("n1", 1)]);
		let b = event("e2", "a1", "renamed", 5, &[("n2", 1)]);
		let first = resolve(ResolutionStrategy::LastWriteWins, &[a.clone(), b.clone()]).unwrap();
		let second = resolve(ResolutionStrategy::LastWriteWins, &[a, b]).unwrap();
		assert_eq!(first.event_id, second.event_id);
	}

	#[test]
	fn merge_takes_freshest_field_from_each_input() {
		let mut a = event("e1", "a1", "updated", 10, &[("n1", 1)]);
		a.payload = serde_json::json!({"name": "alice", "age": 30});
		let mut b = event("e2", "a1", "updated", 20, &[("n2", 1)]);
		b.payload = serde_json::json!({"age": 31});
		let merged = resolve(ResolutionStrategy::Merge, &[a, b]).unwrap();
		assert_eq!(merged.payload["name"], "alice");
		assert_eq!(merged.payload["age"], 31);
		assert_ne!(merged.event_id, "e1");
		assert_ne!(merged.event_id, "e2");
	}
}
