use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use hyper::header::ALLOW;
use hyper::http::HeaderValue;
use hyper::{Method, StatusCode};
use serde::Deserialize;
use tower::{make::Shared, ServiceBuilder};
use tower_http::compression::predicate::{DefaultPredicate, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use warp::{Filter, Rejection, Reply};
use wf_common::ServiceErrorCode;
use wf_rpc::{RequestContext, RequestEnvelope, TransportHeaders};

use crate::app::AppState;
use crate::auth::decode_claims_unverified;
use crate::build_info::{BuildInfo, RuntimeInfo};

use super::json_api_response::{ApiError, JsonApiResponse};
use super::metrics::RPC_METRICS;
use super::node_info_handler::node_info_handler;
use super::with_arg;

/// The minimum size a response body must be in order to be automatically
/// compressed with gzip.
const MINIMUM_RESPONSE_COMPRESSION_SIZE: u16 = 10 << 10;

/// Permissive stand-in for `RequestEnvelope`: both fields optional, so a
/// body that parses as JSON but is missing `p` fails validation (422)
/// instead of being indistinguishable from unparseable JSON (400).
#[derive(Debug, Deserialize)]
struct RawEnvelope {
	p: Option<String>,
	i: Option<serde_json::Value>,
}

pub async fn start_rest_server(
	listen_addr: SocketAddr,
	state: AppState,
	shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
	let routes = rest_routes(state.clone())
		.or(super::ws::ws_route(state.clone()))
		.or(super::sse::sse_route(state.clone()))
		.recover(recover_fn)
		.boxed();
	let warp_service = warp::service(routes);
	let compression_predicate = DefaultPredicate::new().and(SizeAbove::new(MINIMUM_RESPONSE_COMPRESSION_SIZE));
	let cors = build_cors(&state.config.rest_config.cors_allow_origins);

	let service = ServiceBuilder::new()
		.layer(CompressionLayer::new().gzip(true).compress_when(compression_predicate))
		.layer(cors)
		.service(warp_service);

	info!(%listen_addr, "starting REST server");
	tokio::select! {
		res = hyper::Server::bind(&listen_addr).serve(Shared::new(service)) => res.map_err(anyhow::Error::from),
		_ = shutdown_signal => Ok(()),
	}
}

fn rest_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
	let api_v1 = warp::path!("api" / "v1" / ..);
	let rpc_route = warp::path("rpc").and(warp::path::end()).and(rpc_filter(state.clone()));
	let health_route = warp::path("health")
		.and(warp::path::end())
		.and(warp::get())
		.map(|| warp::reply::json(&serde_json::json!({"status": "ok"})));
	let node_route = node_info_handler(BuildInfo::get(), RuntimeInfo::get(), state.config.clone());
	let metrics_route = warp::path("metrics")
		.and(warp::path::end())
		.and(warp::get())
		.map(|| warp::reply::with_header(wf_common::metrics::metrics_text_payload(), "content-type", "text/plain; version=0.0.4"));

	api_v1.and(rpc_route.or(health_route).or(node_route).or(metrics_route)).boxed()
}

fn rpc_filter(state: AppState) -> impl Filter<Extract = (JsonApiResponse,), Error = Rejection> + Clone {
	warp::method()
		.and(warp::header::optional::<String>("content-type"))
		.and(warp::header::optional::<String>("authorization"))
		.and(warp::header::optional::<String>("x-request-id"))
		.and(warp::header::optional::<String>("x-correlation-id"))
		.and(warp::header::optional::<String>("x-tenant-id"))
		.and(warp::header::optional::<String>("x-user-id"))
		.and(warp::header::optional::<String>("user-agent"))
		.and(warp::header::optional::<String>("x-forwarded-for"))
		.and(warp::body::bytes())
		.and(with_arg(state))
		.and_then(handle_rpc)
}

#[allow(clippy::too_many_arguments)]
async fn handle_rpc(
	method: Method,
	content_type: Option<String>,
	authorization: Option<String>,
	request_id: Option<String>,
	correlation_id: Option<String>,
	tenant_id: Option<String>,
	user_id: Option<String>,
	user_agent: Option<String>,
	forwarded_for: Option<String>,
	body: Bytes,
	state: AppState,
) -> Result<JsonApiResponse, Infallible> {
	if method != Method::POST {
		return Ok(JsonApiResponse::failure(ApiError {
			service_code: ServiceErrorCode::MethodNotAllowed,
			message: "only POST is accepted on this resource".to_string(),
			correlation_id: None,
			details: None,
		})
		.with_header(ALLOW, HeaderValue::from_static("POST")));
	}

	match content_type.as_deref() {
		Some(ct) if ct.starts_with("application/json") => {},
		_ => {
			return Ok(JsonApiResponse::failure(ApiError {
				service_code: ServiceErrorCode::UnsupportedMediaType,
				message: "expected content-type: application/json".to_string(),
				correlation_id: None,
				details: None,
			}))
		},
	}

	let raw: RawEnvelope = match serde_json::from_slice(&body) {
		Ok(raw) => raw,
		Err(err) => {
			return Ok(JsonApiResponse::failure(ApiError {
				service_code: ServiceErrorCode::BadRequest,
				message: format!("malformed JSON body: {err}"),
				correlation_id: None,
				details: None,
			}))
		},
	};

	let p = match raw.p.filter(|p| !p.trim().is_empty()) {
		Some(p) => p,
		None => {
			return Ok(JsonApiResponse::failure(ApiError {
				service_code: ServiceErrorCode::ValidationFailed,
				message: "`p` must name a procedure".to_string(),
				correlation_id: None,
				details: Some(serde_json::json!({"field": "p"})),
			}))
		},
	};
	let envelope = RequestEnvelope { p, i: raw.i.unwrap_or(serde_json::Value::Null) };

	let claims = authorization
		.as_deref()
		.and_then(|header| header.strip_prefix("Bearer "))
		.and_then(decode_claims_unverified);
	let headers = TransportHeaders { request_id, correlation_id, tenant_id, user_id, user_agent, forwarded_for };
	let ctx = RequestContext::build(headers, claims);
	let correlation_id = ctx.correlation_id.clone();

	let timer = RPC_METRICS.call_duration_seconds.with_label_values([envelope.p.as_str()]).start_timer();
	let result = state.router.call(&envelope.p, ctx, envelope.i).await;
	timer.observe_duration();

	match result {
		Ok(value) => {
			RPC_METRICS.calls_total.with_label_values([envelope.p.as_str(), "success"]).inc();
			Ok(JsonApiResponse::success(value))
		},
		Err(err) => {
			RPC_METRICS.calls_total.with_label_values([envelope.p.as_str(), "error"]).inc();
			Ok(JsonApiResponse::failure(ApiError::from_error(&err, Some(correlation_id))))
		},
	}
}

async fn recover_fn(rejection: Rejection) -> Result<impl Reply, Rejection> {
	let err = if rejection.is_not_found() {
		ApiError {
			service_code: ServiceErrorCode::NotFound,
			message: "route not found".to_string(),
			correlation_id: None,
			details: None,
		}
	} else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
		ApiError {
			service_code: ServiceErrorCode::BadRequest,
			message: err.to_string(),
			correlation_id: None,
			details: None,
		}
	} else {
		error!(?rejection, "unhandled REST rejection");
		ApiError {
			service_code: ServiceErrorCode::Internal,
			message: "internal server error".to_string(),
			correlation_id: None,
			details: None,
		}
	};
	Ok(JsonApiResponse::failure(err))
}

fn build_cors(cors_origins: &[String]) -> CorsLayer {
	let mut cors = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::OPTIONS]);
	if cors_origins.is_empty() {
		return cors;
	}
	if cors_origins.iter().any(|origin| origin == "*") {
		info!("CORS enabled for all origins");
		return cors.allow_origin(tower_http::cors::Any);
	}
	info!(origins = ?cors_origins, "CORS enabled for configured origins");
	let origins: Vec<HeaderValue> = cors_origins.iter().filter_map(|origin| origin.parse().ok()).collect();
	cors.allow_origin(origins)
}
