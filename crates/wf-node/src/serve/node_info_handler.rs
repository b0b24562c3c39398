use std::sync::Arc;

use serde_json::json;
use warp::{Filter, Rejection};

use crate::build_info::{BuildInfo, RuntimeInfo};
use crate::config::NodeConfig;

use super::with_arg;

/// `GET /api/v1/node/info` and `GET /api/v1/node/config`: host and build
/// provenance, useful for smoke-testing a freshly deployed node.
pub fn node_info_handler(
	build_info: &'static BuildInfo,
	runtime_info: &'static RuntimeInfo,
	config: Arc<NodeConfig>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
	node_version_handler(build_info, runtime_info).or(node_config_handler(config))
}

fn node_version_handler(
	build_info: &'static BuildInfo,
	runtime_info: &'static RuntimeInfo,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
	warp::path!("node" / "info").and(warp::get()).and(with_arg(build_info)).and(with_arg(runtime_info)).then(
		|build_info: &'static BuildInfo, runtime_info: &'static RuntimeInfo| async move {
			warp::reply::json(&json!({ "build": build_info, "runtime": runtime_info }))
		},
	)
}

fn node_config_handler(
	config: Arc<NodeConfig>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
	warp::path!("node" / "config").and(warp::get()).and(with_arg(config)).then(|config: Arc<NodeConfig>| async move {
		warp::reply::json(&*config)
	})
}
