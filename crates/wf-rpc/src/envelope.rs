use serde::{Deserialize, Serialize};
use wf_common::ServiceErrorCode;

/// Request envelope: `p` is the procedure name, `i` is its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
	pub p: String,
	pub i: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
	pub code: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub correlation_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Response envelope: exactly one of `r` (success) or `error` (failure) is
/// present, discriminated by `ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
	Success { ok: bool, r: serde_json::Value },
	Failure { ok: bool, error: ErrorBody },
}

impl ResponseEnvelope {
	pub fn success(value: serde_json::Value) -> Self {
		ResponseEnvelope::Success { ok: true, r: value }
	}

	pub fn failure(
		code: ServiceErrorCode,
		message: impl Into<String>,
		correlation_id: Option<String>,
		details: Option<serde_json::Value>,
	) -> Self {
		ResponseEnvelope::Failure {
			ok: false,
			error: ErrorBody { code: code.as_wire_code().to_string(), message: message.into(), correlation_id, details },
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_envelope_round_trips() {
		let original = RequestEnvelope { p: "process.start".to_string(), i: serde_json::json!({"a": 1}) };
		let encoded = serde_json::to_value(&original).unwrap();
		let decoded: RequestEnvelope = serde_json::from_value(encoded.clone()).unwrap();
		let re_encoded = serde_json::to_value(&decoded).unwrap();
		assert_eq!(encoded, re_encoded);
	}

	#[test]
	fn success_envelope_serializes_with_literal_ok_true() {
		let envelope = ResponseEnvelope::success(serde_json::json!({"x": 1}));
		let value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(value["ok"], serde_json::json!(true));
		assert_eq!(value["r"]["x"], 1);
	}

	#[test]
	fn failure_envelope_serializes_wire_code() {
		let envelope = ResponseEnvelope::failure(ServiceErrorCode::ProcedureNotFound, "no such procedure", Some("req_1_ab".to_string()), None);
		let value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(value["ok"], serde_json::json!(false));
		assert_eq!(value["error"]["code"], "PROCEDURE_NOT_FOUND");
	}
}
