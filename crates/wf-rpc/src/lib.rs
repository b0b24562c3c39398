mod context;
mod envelope;
mod router;

pub use context::{
	validate_access, AccessError, Claims, RequestContext, TransportHeaders, DEFAULT_MESSAGE_TIMEOUT,
};
pub use envelope::{ErrorBody, RequestEnvelope, ResponseEnvelope};
pub use router::{Handler, HandlerFuture, Router, RouterError};
