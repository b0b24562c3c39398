use wf_common::pubsub::Event as BrokerEvent;

/// The payload fanned out over the event broker (§4.5) to WebSocket/SSE
/// subscribers. Carries enough of the underlying store `Event` to let a
/// client render a live feed without a round-trip back to the RPC surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainEvent {
	pub event_id: String,
	pub tenant_id: String,
	pub actor_id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	pub payload: serde_json::Value,
	pub version: u64,
	pub timestamp: i64,
}

impl BrokerEvent for DomainEvent {}

impl DomainEvent {
	pub fn from_store_event(tenant_id: &str, event: &wf_store::Event) -> Self {
		DomainEvent {
			event_id: event.event_id.clone(),
			tenant_id: tenant_id.to_string(),
			actor_id: event.actor_id.clone(),
			event_type: event.event_type.clone(),
			payload: event.payload.clone(),
			version: event.version,
			timestamp: event.timestamp,
		}
	}
}
