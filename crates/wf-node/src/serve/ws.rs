use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};
use wf_common::ServiceErrorCode;
use wf_rpc::{RequestContext, ResponseEnvelope, TransportHeaders};

use crate::app::AppState;
use crate::auth::decode_claims_unverified;
use crate::events::DomainEvent;

use super::with_arg;

/// One message a client may send over the socket: either a wrapped RPC call
/// or a realtime subscription toggle (§4.5).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientFrame {
	Rpc { id: String, procedure: String, input: serde_json::Value },
	Subscribe { event_type: String },
	Unsubscribe { event_type: String },
	Pong,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
	Connected { connection_id: &'a str },
	RpcResponse { id: &'a str, result: serde_json::Value },
	RpcError { id: &'a str, error: wf_rpc::ErrorBody },
	Subscribed { event_type: &'a str },
	Unsubscribed { event_type: &'a str },
	Event { #[serde(flatten)] event: DomainEvent },
}

impl<'a> ServerFrame<'a> {
	fn rpc_result(id: &'a str, envelope: ResponseEnvelope) -> Self {
		match envelope {
			ResponseEnvelope::Success { r, .. } => ServerFrame::RpcResponse { id, result: r },
			ResponseEnvelope::Failure { error, .. } => ServerFrame::RpcError { id, error },
		}
	}
}

pub fn ws_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
	warp::path!("api" / "v1" / "ws")
		.and(warp::ws())
		.and(warp::header::optional::<String>("authorization"))
		.and(warp::header::optional::<String>("x-tenant-id"))
		.and(warp::header::optional::<String>("x-user-id"))
		.and(warp::addr::remote())
		.and(with_arg(state))
		.map(|ws: warp::ws::Ws, authorization, tenant_id, user_id, remote: Option<SocketAddr>, state: AppState| {
			ws.on_upgrade(move |socket| handle_connection(socket, state, authorization, tenant_id, user_id, remote))
		})
}

async fn handle_connection(
	socket: WebSocket,
	state: AppState,
	authorization: Option<String>,
	tenant_id: Option<String>,
	user_id: Option<String>,
	remote: Option<SocketAddr>,
) {
	let connection_id = wf_common::new_quid("conn");
	let (mut sink, mut stream) = socket.split();

	let max_connections = state.config.realtime_config.max_connections;
	let Some(_connection_guard) = ConnectionGuard::try_acquire(state.connection_count.clone(), max_connections) else {
		warn!(%connection_id, max_connections, "rejecting websocket connection: at capacity");
		let close_code = ServiceErrorCode::Unavailable.to_ws_close_code();
		let _ = sink.send(Message::close_with(close_code, "")).await;
		return;
	};

	let claims = authorization.as_deref().and_then(|header| header.strip_prefix("Bearer ")).and_then(decode_claims_unverified);
	let ctx = RequestContext::build(
		TransportHeaders { tenant_id, user_id, forwarded_for: remote.map(|addr| addr.to_string()), ..Default::default() },
		claims,
	);

	if send_frame(&mut sink, &ServerFrame::Connected { connection_id: &connection_id }).await.is_err() {
		return;
	}

	let (event_tx, mut event_rx) = mpsc::unbounded_channel::<DomainEvent>();
	let tenant_for_filter = ctx.tenant_id.clone();
	let subscription = state.broker.subscribe::<DomainEvent>(move |event: DomainEvent| {
		if event.tenant_id == tenant_for_filter {
			let _ = event_tx.send(event);
		}
	});

	let mut subscribed_types: HashSet<String> = HashSet::new();
	let heartbeat_interval = state.config.realtime_config.heartbeat_interval;
	let connection_timeout = state.config.realtime_config.connection_timeout;
	let mut last_pong = Instant::now();
	let mut heartbeat = time::interval(heartbeat_interval);

	let close_reason = loop {
		tokio::select! {
			_ = heartbeat.tick() => {
				if last_pong.elapsed() > connection_timeout {
					info!(%connection_id, "closing websocket after missed heartbeats");
					break CloseReason::HeartbeatTimeout;
				}
				if sink.send(Message::ping(Vec::new())).await.is_err() {
					break CloseReason::SendFailed;
				}
			}
			event = event_rx.recv() => {
				let Some(event) = event else { break CloseReason::StreamEnded };
				if subscribed_types.contains(&event.event_type) || subscribed_types.contains("*") {
					if send_frame(&mut sink, &ServerFrame::Event { event }).await.is_err() {
						break CloseReason::SendFailed;
					}
				}
			}
			frame = stream.next() => {
				let Some(Ok(message)) = frame else { break CloseReason::StreamEnded };
				if message.is_pong() {
					last_pong = Instant::now();
					continue;
				}
				if message.is_close() {
					break CloseReason::ClientClosed;
				}
				if !message.is_text() {
					continue;
				}
				let Ok(client_frame) = serde_json::from_str::<ClientFrame>(message.to_str().unwrap_or_default()) else {
					warn!(%connection_id, "dropping malformed websocket frame");
					continue;
				};
				match client_frame {
					ClientFrame::Pong => last_pong = Instant::now(),
					ClientFrame::Subscribe { event_type } => {
						subscribed_types.insert(event_type.clone());
						if send_frame(&mut sink, &ServerFrame::Subscribed { event_type: &event_type }).await.is_err() {
							break CloseReason::SendFailed;
						}
					}
					ClientFrame::Unsubscribe { event_type } => {
						subscribed_types.remove(&event_type);
						if send_frame(&mut sink, &ServerFrame::Unsubscribed { event_type: &event_type }).await.is_err() {
							break CloseReason::SendFailed;
						}
					}
					ClientFrame::Rpc { id, procedure, input } => {
						let envelope = match state.router.call(&procedure, ctx.clone(), input).await {
							Ok(value) => ResponseEnvelope::success(value),
							Err(err) => ResponseEnvelope::failure(
								wf_common::ServiceError::error_code(&err),
								err.to_string(),
								Some(ctx.correlation_id.clone()),
								None,
							),
						};
						if send_frame(&mut sink, &ServerFrame::rpc_result(&id, envelope)).await.is_err() {
							break CloseReason::SendFailed;
						}
					}
				}
			}
		}
	};

	subscription.cancel();
	debug!(%connection_id, ?close_reason, "websocket connection closed");
	let close_code = close_reason.to_ws_close_code();
	let _ = sink.send(Message::close_with(close_code, "")).await;
}

/// Reserves one slot against `realtime_config.max_connections` for the
/// lifetime of a single connection, releasing it on drop regardless of how
/// the connection ends.
struct ConnectionGuard {
	count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
	fn try_acquire(count: Arc<AtomicUsize>, max_connections: usize) -> Option<Self> {
		loop {
			let current = count.load(Ordering::SeqCst);
			if current >= max_connections {
				return None;
			}
			if count.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
				return Some(ConnectionGuard { count });
			}
		}
	}
}

impl Drop for ConnectionGuard {
	fn drop(&mut self) {
		self.count.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Why `handle_connection`'s loop ended, used to pick a close code that
/// actually reflects the cause instead of always reporting `Unavailable`.
#[derive(Debug, Clone, Copy)]
enum CloseReason {
	ClientClosed,
	HeartbeatTimeout,
	SendFailed,
	StreamEnded,
}

impl CloseReason {
	fn to_ws_close_code(self) -> u16 {
		match self {
			CloseReason::ClientClosed => 1000,
			CloseReason::HeartbeatTimeout => ServiceErrorCode::Unavailable.to_ws_close_code(),
			CloseReason::SendFailed | CloseReason::StreamEnded => ServiceErrorCode::Internal.to_ws_close_code(),
		}
	}
}

async fn send_frame(
	sink: &mut (impl SinkExt<Message, Error = warp::Error> + Unpin),
	frame: &ServerFrame<'_>,
) -> Result<(), warp::Error> {
	let payload = serde_json::to_string(frame).unwrap_or_default();
	sink.send(Message::text(payload)).await
}
