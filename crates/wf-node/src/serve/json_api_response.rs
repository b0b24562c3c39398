use hyper::header::{HeaderName, CONTENT_TYPE};
use hyper::http::HeaderValue;
use hyper::{Body, Response, StatusCode};
use warp::Reply;
use wf_common::{ServiceError, ServiceErrorCode};
use wf_rpc::ResponseEnvelope;

/// Adapts an arbitrary `ServiceError` into the wire envelope's `error` shape,
/// carrying the request's `correlationId` so a client can match a failure
/// back to the call that produced it (§4.5, §7).
pub struct ApiError {
	pub service_code: ServiceErrorCode,
	pub message: String,
	pub correlation_id: Option<String>,
	pub details: Option<serde_json::Value>,
}

impl ApiError {
	pub fn from_error(err: &impl ServiceError, correlation_id: Option<String>) -> Self {
		ApiError {
			service_code: err.error_code(),
			message: err.to_string(),
			correlation_id,
			details: err.details(),
		}
	}
}

/// A `{ok, r|error}` JSON reply for the REST API.
pub struct JsonApiResponse {
	status_code: StatusCode,
	body: Vec<u8>,
	extra_headers: Vec<(HeaderName, HeaderValue)>,
}

impl JsonApiResponse {
	pub fn success(value: serde_json::Value) -> Self {
		let envelope = ResponseEnvelope::success(value);
		JsonApiResponse {
			status_code: StatusCode::OK,
			body: serde_json::to_vec(&envelope).unwrap_or_default(),
			extra_headers: Vec::new(),
		}
	}

	pub fn failure(err: ApiError) -> Self {
		let status_code = err.service_code.to_http_status_code();
		let envelope = ResponseEnvelope::failure(err.service_code, err.message, err.correlation_id, err.details);
		JsonApiResponse { status_code, body: serde_json::to_vec(&envelope).unwrap_or_default(), extra_headers: Vec::new() }
	}

	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.extra_headers.push((name, value));
		self
	}
}

impl Reply for JsonApiResponse {
	fn into_response(self) -> Response<Body> {
		let mut response = Response::new(self.body.into());
		response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		for (name, value) in self.extra_headers {
			response.headers_mut().insert(name, value);
		}
		*response.status_mut() = self.status_code;
		response
	}
}
