#![deny(clippy::disallowed_methods)]

//! A small actor framework providing per-actor serial message handling,
//! bounded mailboxes, supervised restarts, and clean shutdown.
//!
//! It solves the following problem:
//! - have sync and async tasks communicate together.
//! - make these tasks observable.
//! - make these tasks modular and testable.
//! - detect when some task is stuck and does not progress anymore.

use std::{fmt, num::NonZeroU64};

use once_cell::sync::Lazy;
use tokio::time::Duration;

mod actor;
mod actor_context;
mod actor_handle;
mod actor_state;
#[doc(hidden)]
pub mod channel_with_priority;
mod command;
mod envelope;
mod messagebus;
mod registry;
pub(crate) mod scheduler;
mod spawn_builder;
mod supervisor;

mod runtime;
#[cfg(test)]
pub(crate) mod tests;

pub use actor::{Actor, ActorExitStatus, DeferableReplyHandler, Handler};
pub use actor_handle::{ActorHandle, Health, Healthz, Supervisable};
pub use command::{Command, Observe};
use thiserror::Error;
use tracing::{info, warn};
use wf_common::{ServiceError, ServiceErrorCode};

pub use self::{
	actor_context::ActorContext,
	actor_state::ActorState,
	channel_with_priority::{QueueCapacity, RecvError, SendError, TrySendError},
	messagebus::{Inbox, MessageBus, WeakMessagebus},
	registry::ActorObservation,
	runtime::Runtime,
	scheduler::{start_scheduler, SchedulerClient},
	spawn_builder::SpawnContext,
	supervisor::{RestartPolicy, Supervisor, SupervisorMetrics, SupervisorState},
};

/// Heartbeat used to verify that actors are progressing.
///
/// If an actor does not advertise progress within an interval of duration
/// `HEARTBEAT`, its supervisor considers it blocked and kills it, along with
/// every actor sharing its terminate signal.
pub static HEARTBEAT: Lazy<Duration> = Lazy::new(heartbeat_from_env_or_default);

/// Returns the actor heartbeat duration, derived from `WF_ACTOR_HEARTBEAT_SECS`
/// when set and valid, defaulting to 30 seconds (100ms under the `testsuite`
/// feature, so tests observing a stuck actor do not wait needlessly).
fn heartbeat_from_env_or_default() -> Duration {
	if cfg!(any(test, feature = "testsuite")) {
		return Duration::from_millis(100);
	}
	match std::env::var("WF_ACTOR_HEARTBEAT_SECS") {
		Ok(secs_str) => {
			if let Ok(secs) = secs_str.parse::<NonZeroU64>() {
				info!("set the actor heartbeat to {secs} seconds");
				return Duration::from_secs(secs.get());
			}
			warn!(
				"failed to parse `WF_ACTOR_HEARTBEAT_SECS={secs_str}` as seconds > 0, using \
				 default heartbeat (30 seconds)"
			);
		},
		Err(std::env::VarError::NotUnicode(os_str)) => {
			warn!(
				"failed to parse `WF_ACTOR_HEARTBEAT_SECS={os_str:?}` as a valid unicode string, \
				 using default heartbeat (30 seconds)"
			);
		},
		Err(std::env::VarError::NotPresent) => {},
	}
	Duration::from_secs(30)
}

/// Time we accept to wait for a new observation before returning the last one.
const OBSERVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Error produced by `ActorContext::ask(..)` or `Runtime::ask`.
#[derive(Error, Debug)]
pub enum AskError<E: fmt::Debug> {
	#[error("message could not be delivered")]
	MessageNotDelivered,
	#[error("error while the message was being processed")]
	ProcessMessageError,
	#[error("the handler returned an error: `{0:?}`")]
	ErrorReply(#[from] E),
}

impl<E: fmt::Debug + ServiceError> ServiceError for AskError<E> {
	fn error_code(&self) -> ServiceErrorCode {
		match self {
			AskError::MessageNotDelivered => ServiceErrorCode::Unavailable,
			AskError::ProcessMessageError => ServiceErrorCode::Internal,
			AskError::ErrorReply(err) => err.error_code(),
		}
	}
}
