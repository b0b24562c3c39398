use std::convert::Infallible;
use std::net::SocketAddr;

use tracing::info;
use warp::Filter;

pub mod json_api_response;
pub mod metrics;
pub mod node_info_handler;
pub mod rest;
pub mod sse;
pub mod ws;

pub use rest::start_rest_server;

use crate::app::AppState;

fn with_arg<T: Clone + Send>(arg: T) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
	warp::any().map(move || arg.clone())
}

/// Binds the listener and blocks until `shutdown_signal` resolves, serving
/// REST, WebSocket, and SSE transports from the one port (§4.5).
pub async fn serve(state: AppState, shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
	let listen_addr: SocketAddr =
		format!("{}:{}", state.config.rest_config.listen_addr, state.config.rest_config.listen_port).parse()?;
	info!(node_id = %state.config.node_id, %listen_addr, "node ready to serve");
	start_rest_server(listen_addr, state, shutdown_signal).await
}
