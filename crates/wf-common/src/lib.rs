pub mod error;
pub mod metrics;
pub mod progress;
pub mod pubsub;
pub mod quid;
pub mod retry;
pub mod terminate_sig;
pub mod type_map;

pub use error::{ServiceError, ServiceErrorCode};
pub use progress::{Progress, ProtectedZoneGuard};
pub use pubsub::{Event, EventBroker, EventSubscriber, EventSubscriptionHandle};
pub use quid::{new_correlation_id, new_quid};
pub use retry::{retry, Retry, RetryParams, Retryable};
pub use terminate_sig::TerminateSignal;
pub use type_map::TMap;
