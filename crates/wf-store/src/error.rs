use std::sync::Arc;

use thiserror::Error;
use wf_common::{ServiceError, ServiceErrorCode};

/// Closed classification of failures an [`crate::EventStore`] implementation can raise.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreErrorKind {
	/// `append` was called with a stale `expected_version`.
	VersionConflict,
	/// The requested actor, event, or snapshot does not exist.
	NotFound,
	/// Backing storage failure unrelated to the above.
	Internal,
}

#[derive(Debug, Clone, Error)]
#[error("event store error(kind={kind:?}, source={source})")]
pub struct StoreError {
	pub kind: StoreErrorKind,
	#[source]
	pub source: Arc<anyhow::Error>,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
	pub fn version_conflict(actor_id: &str, expected: u64, actual: u64) -> Self {
		StoreError {
			kind: StoreErrorKind::VersionConflict,
			source: Arc::new(anyhow::anyhow!(
				"actor `{actor_id}` expected version {expected}, latest is {actual}"
			)),
		}
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		StoreError { kind: StoreErrorKind::NotFound, source: Arc::new(anyhow::anyhow!(message.into())) }
	}

	pub fn kind(&self) -> StoreErrorKind {
		self.kind
	}
}

impl ServiceError for StoreError {
	fn error_code(&self) -> ServiceErrorCode {
		match self.kind {
			StoreErrorKind::VersionConflict => ServiceErrorCode::VersionConflict,
			StoreErrorKind::NotFound => ServiceErrorCode::NotFound,
			StoreErrorKind::Internal => ServiceErrorCode::Internal,
		}
	}
}
