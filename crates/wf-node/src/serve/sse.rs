use std::convert::Infallible;

use futures::StreamExt;
use warp::sse::Event as SseEvent;
use warp::{Filter, Rejection, Reply};

use crate::app::AppState;
use crate::events::DomainEvent;

use super::with_arg;

/// `GET /api/v1/events`: a server-sent event feed of domain events for the
/// caller's tenant (§4.5). A `Last-Event-ID` header (set to the millisecond
/// timestamp of the last frame the client saw) replays anything buffered
/// since that point before switching to live delivery.
pub fn sse_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
	warp::path!("api" / "v1" / "events")
		.and(warp::get())
		.and(warp::header::optional::<String>("last-event-id"))
		.and(warp::header::optional::<String>("x-tenant-id"))
		.and(warp::query::<EventsQuery>())
		.and(with_arg(state))
		.map(|last_event_id: Option<String>, tenant_id: Option<String>, query: EventsQuery, state: AppState| {
			let tenant_id = tenant_id.unwrap_or_else(|| "default".to_string());
			let event_type_filter = query.event_type;
			let since = last_event_id.and_then(|id| id.parse::<u128>().ok()).unwrap_or(0);
			let connection_id = wf_common::new_quid("conn");
			let connection_timeout = state.config.realtime_config.connection_timeout;

			let replay: Vec<DomainEvent> = state
				.broker
				.buffered_since::<DomainEvent>(since)
				.into_iter()
				.filter(|event| event.tenant_id == tenant_id)
				.collect();

			let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<DomainEvent>();
			let subscription = state.broker.subscribe::<DomainEvent>({
				let tenant_id = tenant_id.clone();
				move |event: DomainEvent| {
					if event.tenant_id == tenant_id {
						let _ = tx.send(event);
					}
				}
			});

			// Ends the stream once `connection_timeout` passes with no event, so
			// an idle client's SSE connection is closed (§4.5) rather than held
			// open forever.
			let live = futures::stream::unfold(rx, move |mut rx| async move {
				match tokio::time::timeout(connection_timeout, rx.recv()).await {
					Ok(Some(event)) => Some((event, rx)),
					Ok(None) | Err(_) => None,
				}
			});

			let connected = futures::stream::once(async move {
				Ok::<_, Infallible>(
					SseEvent::default()
						.event("connected")
						.json_data(serde_json::json!({"connectionId": connection_id}))
						.unwrap_or_default(),
				)
			});

			// `.map` holds `subscription` for as long as this stream lives, so the
			// broker keeps fanning events into `tx` until the SSE connection drops.
			let domain_events = futures::stream::iter(replay).chain(live).map(move |event| {
				let _keep_alive = &subscription;
				event
			}).filter_map(move |event| {
				let event_type_filter = event_type_filter.clone();
				async move {
					if event_type_filter.as_deref().map(|want| want == event.event_type).unwrap_or(true) {
						Some(to_sse_event(event))
					} else {
						None
					}
				}
			});
			let events = connected.chain(domain_events);

			warp::sse::reply(warp::sse::keep_alive().interval(std::time::Duration::from_secs(15)).stream(events))
		})
}

#[derive(Debug, serde::Deserialize)]
struct EventsQuery {
	#[serde(rename = "eventType")]
	event_type: Option<String>,
}

fn to_sse_event(event: DomainEvent) -> Result<SseEvent, Infallible> {
	let id = event.timestamp.to_string();
	let event_type = event.event_type.clone();
	Ok(SseEvent::default().id(id).event(event_type).json_data(event).unwrap_or_default())
}
