use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use wf_common::{new_correlation_id, ServiceError, ServiceErrorCode};

/// Default time a handler has to finish before its `deadline` has passed, per
/// `messageTimeout`.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Opaque bearer-token claims. The decoder that produces these performs no
/// signature verification; callers must plug in a real verifier before
/// exposing this to untrusted networks.
#[derive(Debug, Clone, Default)]
pub struct Claims {
	pub sub: String,
	pub exp: i64,
	pub iat: i64,
	pub tenant_id: Option<String>,
	pub organization_id: Option<String>,
	pub roles: Vec<String>,
	pub permissions: Vec<String>,
	pub extensions: HashMap<String, serde_json::Value>,
}

/// Raw ingress data a transport adapter extracts before constructing a context.
#[derive(Debug, Clone, Default)]
pub struct TransportHeaders {
	pub request_id: Option<String>,
	pub correlation_id: Option<String>,
	pub tenant_id: Option<String>,
	pub user_id: Option<String>,
	pub user_agent: Option<String>,
	pub forwarded_for: Option<String>,
}

/// Immutable, per-call context threaded through routers, actors, and sagas.
#[derive(Debug, Clone)]
pub struct RequestContext {
	pub correlation_id: String,
	pub tenant_id: String,
	pub principal_id: String,
	pub user_agent: Option<String>,
	pub ip_address: Option<String>,
	pub timestamp: i64,
	pub auth: Option<Claims>,
	pub deadline: SystemTime,
}

impl RequestContext {
	/// Builds a context from transport headers and, when present, previously
	/// decoded bearer claims: (1) claims populate identity first, (2) headers
	/// fill gaps only (never overriding token-derived identity), (3) framework
	/// defaults fill whatever remains unset.
	pub fn build(headers: TransportHeaders, claims: Option<Claims>) -> RequestContext {
		let now = SystemTime::now();
		let timestamp = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64;

		let tenant_id = claims
			.as_ref()
			.and_then(|c| c.tenant_id.clone())
			.or_else(|| headers.tenant_id.clone())
			.unwrap_or_else(|| "default".to_string());

		let principal_id = claims
			.as_ref()
			.map(|c| c.sub.clone())
			.or_else(|| headers.user_id.clone())
			.unwrap_or_else(|| "anonymous".to_string());

		let correlation_id = headers
			.request_id
			.clone()
			.or_else(|| headers.correlation_id.clone())
			.unwrap_or_else(new_correlation_id);

		RequestContext {
			correlation_id,
			tenant_id,
			principal_id,
			user_agent: headers.user_agent,
			ip_address: headers.forwarded_for,
			timestamp,
			auth: claims,
			deadline: now + DEFAULT_MESSAGE_TIMEOUT,
		}
	}

	pub fn is_past_deadline(&self) -> bool {
		SystemTime::now() >= self.deadline
	}
}

const ADMIN_ROLES: &[&str] = &["admin", "superadmin"];

/// Succeeds when the context's permissions contain `"<resource>:<action>"` or
/// its roles include an admin-equivalent role; fails with `PermissionDenied`
/// otherwise.
pub fn validate_access(ctx: &RequestContext, resource: &str, action: &str) -> Result<(), AccessError> {
	let capability = format!("{resource}:{action}");
	let Some(auth) = &ctx.auth else {
		return Err(AccessError { capability });
	};
	if auth.permissions.iter().any(|p| p == &capability) {
		return Ok(());
	}
	if auth.roles.iter().any(|role| ADMIN_ROLES.contains(&role.as_str())) {
		return Ok(());
	}
	Err(AccessError { capability })
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("permission denied: missing capability `{capability}`")]
pub struct AccessError {
	pub capability: String,
}

impl ServiceError for AccessError {
	fn error_code(&self) -> ServiceErrorCode {
		ServiceErrorCode::PermissionDenied
	}

	fn details(&self) -> Option<serde_json::Value> {
		Some(serde_json::json!({ "capability": self.capability }))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_tenant_fills_gap_when_no_claims() {
		let ctx = RequestContext::build(
			TransportHeaders { tenant_id: Some("acme".to_string()), ..Default::default() },
			None,
		);
		assert_eq!(ctx.tenant_id, "acme");
	}

	#[test]
	fn claims_tenant_overrides_header() {
		let claims = Claims { tenant_id: Some("from-token".to_string()), ..Default::default() };
		let ctx = RequestContext::build(
			TransportHeaders { tenant_id: Some("from-header".to_string()), ..Default::default() },
			Some(claims),
		);
		assert_eq!(ctx.tenant_id, "from-token");
	}

	#[test]
	fn request_id_header_becomes_correlation_id() {
		let ctx = RequestContext::build(
			TransportHeaders { request_id: Some("req-from-client".to_string()), ..Default::default() },
			None,
		);
		assert_eq!(ctx.correlation_id, "req-from-client");
	}

	#[test]
	fn missing_request_id_generates_wire_format_correlation_id() {
		let ctx = RequestContext::build(TransportHeaders::default(), None);
		assert!(ctx.correlation_id.starts_with("req_"));
	}

	#[test]
	fn validate_access_succeeds_for_matching_permission() {
		let claims = Claims { permissions: vec!["order:read".to_string()], ..Default::default() };
		let ctx = RequestContext::build(TransportHeaders::default(), Some(claims));
		assert!(validate_access(&ctx, "order", "read").is_ok());
	}

	#[test]
	fn validate_access_succeeds_for_admin_role_regardless_of_permissions() {
		let claims = Claims { roles: vec!["admin".to_string()], ..Default::default() };
		let ctx = RequestContext::build(TransportHeaders::default(), Some(claims));
		assert!(validate_access(&ctx, "anything", "delete").is_ok());
	}

	#[test]
	fn validate_access_fails_without_auth() {
		let ctx = RequestContext::build(TransportHeaders::default(), None);
		assert!(validate_access(&ctx, "order", "read").is_err());
	}
}
