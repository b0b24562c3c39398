use std::convert::Infallible;

/// Closed taxonomy of error codes that can cross a transport boundary.
///
/// Mirrors the wire format codes: every variant has both an HTTP status and a
/// `SCREAMING_SNAKE_CASE` wire code used in the `{"ok":false,"error":{"code":...}}`
/// envelope and in WebSocket close-code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorCode {
	MethodNotAllowed,
	UnsupportedMediaType,
	BadRequest,
	ValidationFailed,
	ProcedureNotFound,
	Unauthorized,
	PermissionDenied,
	VersionConflict,
	AlreadyExists,
	NotFound,
	Timeout,
	RateLimited,
	Unavailable,
	Internal,
}

impl ServiceErrorCode {
	pub fn to_http_status_code(self) -> http::StatusCode {
		use http::StatusCode as S;
		match self {
			ServiceErrorCode::MethodNotAllowed => S::METHOD_NOT_ALLOWED,
			ServiceErrorCode::UnsupportedMediaType => S::UNSUPPORTED_MEDIA_TYPE,
			ServiceErrorCode::BadRequest => S::BAD_REQUEST,
			ServiceErrorCode::ValidationFailed => S::UNPROCESSABLE_ENTITY,
			ServiceErrorCode::ProcedureNotFound => S::NOT_FOUND,
			ServiceErrorCode::Unauthorized => S::UNAUTHORIZED,
			ServiceErrorCode::PermissionDenied => S::FORBIDDEN,
			ServiceErrorCode::VersionConflict => S::CONFLICT,
			ServiceErrorCode::AlreadyExists => S::CONFLICT,
			ServiceErrorCode::NotFound => S::NOT_FOUND,
			ServiceErrorCode::Timeout => S::REQUEST_TIMEOUT,
			ServiceErrorCode::RateLimited => S::TOO_MANY_REQUESTS,
			ServiceErrorCode::Unavailable => S::SERVICE_UNAVAILABLE,
			ServiceErrorCode::Internal => S::INTERNAL_SERVER_ERROR,
		}
	}

	/// WebSocket close code for errors that terminate the connection.
	pub fn to_ws_close_code(self) -> u16 {
		match self {
			ServiceErrorCode::ValidationFailed => 1008,
			ServiceErrorCode::RateLimited | ServiceErrorCode::Unavailable => 1013,
			ServiceErrorCode::Internal => 1011,
			_ => 1000,
		}
	}

	/// The wire-format string used in `error.code`.
	pub fn as_wire_code(self) -> &'static str {
		match self {
			ServiceErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
			ServiceErrorCode::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
			ServiceErrorCode::BadRequest => "BAD_REQUEST",
			ServiceErrorCode::ValidationFailed => "VALIDATION_FAILED",
			ServiceErrorCode::ProcedureNotFound => "PROCEDURE_NOT_FOUND",
			ServiceErrorCode::Unauthorized => "UNAUTHORIZED",
			ServiceErrorCode::PermissionDenied => "PERMISSION_DENIED",
			ServiceErrorCode::VersionConflict => "VERSION_CONFLICT",
			ServiceErrorCode::AlreadyExists => "ALREADY_EXISTS",
			ServiceErrorCode::NotFound => "NOT_FOUND",
			ServiceErrorCode::Timeout => "TIMEOUT",
			ServiceErrorCode::RateLimited => "RATE_LIMITED",
			ServiceErrorCode::Unavailable => "UNAVAILABLE",
			ServiceErrorCode::Internal => "INTERNAL",
		}
	}

	/// Whether a caller may retry the operation that produced this code.
	pub fn is_retryable(self) -> bool {
		matches!(
			self,
			ServiceErrorCode::Timeout | ServiceErrorCode::RateLimited | ServiceErrorCode::Unavailable
		)
	}
}

/// Implemented by every error type that can be turned into a response envelope.
pub trait ServiceError: ToString {
	fn error_code(&self) -> ServiceErrorCode;

	/// Extra structured detail attached to the error envelope (e.g. field-level
	/// validation failures). `None` by default.
	fn details(&self) -> Option<serde_json::Value> {
		None
	}
}

impl ServiceError for Infallible {
	fn error_code(&self) -> ServiceErrorCode {
		unreachable!()
	}
}
