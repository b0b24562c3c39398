use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use wf_common::{ServiceError, ServiceErrorCode};

use crate::context::RequestContext;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, RouterError>> + Send>>;
pub type Handler = Arc<dyn Fn(RequestContext, serde_json::Value) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
	#[error("procedure `{0}` is already registered")]
	DuplicateProcedure(String),
	#[error("procedure `{0}` is not registered")]
	ProcedureNotFound(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("validation failed: {0}")]
	ValidationFailed(String),
	#[error("internal error: {0}")]
	Internal(String),
}

impl ServiceError for RouterError {
	fn error_code(&self) -> ServiceErrorCode {
		match self {
			RouterError::DuplicateProcedure(_) => ServiceErrorCode::AlreadyExists,
			RouterError::ProcedureNotFound(_) => ServiceErrorCode::ProcedureNotFound,
			RouterError::NotFound(_) => ServiceErrorCode::NotFound,
			RouterError::ValidationFailed(_) => ServiceErrorCode::ValidationFailed,
			RouterError::Internal(_) => ServiceErrorCode::Internal,
		}
	}
}

/// Name-based dispatch table. Handlers are registered once at startup and
/// invoked by name thereafter; the table itself never mutates after warm-up,
/// but is still guarded so hot-reload or test setup can add procedures safely.
#[derive(Default)]
pub struct Router {
	procedures: std::sync::RwLock<HashMap<String, Handler>>,
}

impl Router {
	pub fn new() -> Self {
		Router { procedures: std::sync::RwLock::new(HashMap::new()) }
	}

	pub fn register(&self, name: impl Into<String>, handler: Handler) -> Result<(), RouterError> {
		let name = name.into();
		let mut procedures = self.procedures.write().expect("router lock poisoned");
		if procedures.contains_key(&name) {
			return Err(RouterError::DuplicateProcedure(name));
		}
		procedures.insert(name, handler);
		Ok(())
	}

	pub async fn call(
		&self,
		name: &str,
		ctx: RequestContext,
		input: serde_json::Value,
	) -> Result<serde_json::Value, RouterError> {
		let handler = {
			let procedures = self.procedures.read().expect("router lock poisoned");
			procedures.get(name).cloned()
		};
		match handler {
			Some(handler) => handler(ctx, input).await,
			None => Err(RouterError::ProcedureNotFound(name.to_string())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::TransportHeaders;

	fn test_ctx() -> RequestContext {
		RequestContext::build(TransportHeaders::default(), None)
	}

	fn echo_handler() -> Handler {
		Arc::new(|_ctx, input| Box::pin(async move { Ok(input) }))
	}

	#[tokio::test]
	async fn register_then_call_round_trips_input() {
		let router = Router::new();
		router.register("echo", echo_handler()).unwrap();
		let result = router.call("echo", test_ctx(), serde_json::json!({"x": 1})).await.unwrap();
		assert_eq!(result, serde_json::json!({"x": 1}));
	}

	#[tokio::test]
	async fn duplicate_registration_fails() {
		let router = Router::new();
		router.register("echo", echo_handler()).unwrap();
		let err = router.register("echo", echo_handler()).unwrap_err();
		assert!(matches!(err, RouterError::DuplicateProcedure(_)));
	}

	#[tokio::test]
	async fn unknown_procedure_fails() {
		let router = Router::new();
		let err = router.call("missing", test_ctx(), serde_json::json!({})).await.unwrap_err();
		assert!(matches!(err, RouterError::ProcedureNotFound(_)));
		assert_eq!(err.error_code(), ServiceErrorCode::ProcedureNotFound);
	}
}
