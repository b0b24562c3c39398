mod error;
mod event;
mod memory;
mod store;

pub use error::{StoreError, StoreErrorKind, StoreResult};
pub use event::{
	checksum_of, compare_vector_clocks, merge_vector_clocks, now_millis, ClockOrdering, Event,
	Snapshot, SnapshotPolicy, VectorClock,
};
pub use memory::InMemoryEventStore;
pub use store::{rebuild, EventStore};
