use std::sync::atomic::{AtomicU64, Ordering};

use rand::{distributions::Alphanumeric, prelude::*};

const ADJECTIVES: &[&str] = &[
	"aged", "ancient", "autumn", "billowing", "bitter", "black", "blue", "bold", "broken", "cold",
	"cool", "crimson", "damp", "dark", "dawn", "delicate", "divine", "dry", "empty", "falling",
	"floral", "fragrant", "frosty", "green", "hidden", "holy", "icy", "late", "lingering", "little",
	"lively", "long", "misty", "morning", "muddy", "nameless", "old", "patient", "polished",
	"proud", "purple", "quiet", "red", "restless", "rough", "shy", "silent", "small", "snowy",
	"solitary", "sparkling", "spring", "still", "summer", "throbbing", "twilight", "wandering",
	"weathered", "white", "wild", "winter", "wispy", "withered", "young",
];

/// Returns a randomly generated, human-readable id of the form `{name}-{adjective}-{slug}`.
///
/// Used for entity ids (instance ids, saga ids, task ids) where uniqueness matters
/// more than a specific wire format.
pub fn new_quid(name: &str) -> String {
	let mut rng = rand::thread_rng();
	let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
	let slug: String = rng.sample_iter(&Alphanumeric).take(4).map(char::from).collect();
	format!("{name}-{adjective}-{slug}")
}

static CORRELATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Returns a freshly generated correlation id matching `^req_[0-9]+_[a-z0-9]+$`.
///
/// Used whenever a transport ingress does not receive `x-request-id` from the caller.
pub fn new_correlation_id() -> String {
	let seq = CORRELATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
	let slug: String = rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(8)
		.map(|b| (b as char).to_ascii_lowercase())
		.collect();
	format!("req_{seq}_{slug}")
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use regex::Regex;

	use super::*;

	#[test]
	fn quid_is_unique() {
		let ids: HashSet<String> = std::iter::repeat_with(|| new_quid("instance")).take(100).collect();
		assert_eq!(ids.len(), 100);
	}

	#[test]
	fn correlation_id_matches_wire_format() {
		let re = Regex::new(r"^req_[0-9]+_[a-z0-9]+$").unwrap();
		for _ in 0..50 {
			let id = new_correlation_id();
			assert!(re.is_match(&id), "{id} does not match expected format");
		}
	}

	#[test]
	fn correlation_id_is_unique_across_calls() {
		let a = new_correlation_id();
		let b = new_correlation_id();
		assert_ne!(a, b);
	}
}
