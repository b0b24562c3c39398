use base64::Engine;
use serde::Deserialize;
use wf_rpc::Claims;

/// Decodes the claims out of a JWT's payload segment without checking its
/// signature. Per §9 open questions, signature verification is explicitly out
/// of scope here; a production deployment must wrap this with a real
/// verifier before trusting the bearer token.
pub fn decode_claims_unverified(bearer_token: &str) -> Option<Claims> {
	let mut segments = bearer_token.split('.');
	let _header = segments.next()?;
	let payload_b64 = segments.next()?;
	let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
	let raw: RawClaims = serde_json::from_slice(&payload_bytes).ok()?;

	Some(Claims {
		sub: raw.sub,
		exp: raw.exp,
		iat: raw.iat,
		tenant_id: raw.tenant_id.or(raw.organization_id.clone()),
		organization_id: raw.organization_id,
		roles: raw.roles,
		permissions: raw.permissions,
		extensions: raw.extra,
	})
}

#[derive(Debug, Deserialize)]
struct RawClaims {
	sub: String,
	exp: i64,
	iat: i64,
	#[serde(default, rename = "tenantId")]
	tenant_id: Option<String>,
	#[serde(default, rename = "organizationId")]
	organization_id: Option<String>,
	#[serde(default)]
	roles: Vec<String>,
	#[serde(default)]
	permissions: Vec<String>,
	#[serde(flatten)]
	extra: std::collections::HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn encode_segment(value: &serde_json::Value) -> String {
		base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
	}

	#[test]
	fn decodes_claims_from_well_formed_token() {
		let header = encode_segment(&serde_json::json!({"alg": "none"}));
		let payload = encode_segment(&serde_json::json!({
			"sub": "user-1",
			"exp": 9999999999i64,
			"iat": 1,
			"tenantId": "acme",
			"roles": ["admin"],
			"permissions": ["order:read"],
		}));
		let token = format!("{header}.{payload}.sig");
		let claims = decode_claims_unverified(&token).unwrap();
		assert_eq!(claims.sub, "user-1");
		assert_eq!(claims.tenant_id.as_deref(), Some("acme"));
		assert_eq!(claims.roles, vec!["admin".to_string()]);
	}

	#[test]
	fn malformed_token_decodes_to_none() {
		assert!(decode_claims_unverified("not-a-jwt").is_none());
	}
}
