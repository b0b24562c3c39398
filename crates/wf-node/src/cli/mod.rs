pub mod cli_main;
pub mod logger;
pub mod service;

pub use cli_main::{build_cli, CliCommand};
pub use logger::setup_logging_and_tracing;

use anyhow::Context;
use tracing::info;

use crate::config::NodeConfig;

/// Loads a node config at `config_uri`, falling back to defaults when the
/// file doesn't exist — convenient for local smoke testing.
pub async fn load_node_config(config_uri: &str) -> anyhow::Result<NodeConfig> {
	if !tokio::fs::try_exists(config_uri).await.unwrap_or(false) {
		info!(config_uri, "no config file found, using defaults");
		return Ok(NodeConfig::default());
	}
	let config_content = tokio::fs::read(config_uri)
		.await
		.with_context(|| format!("failed to read node config file at `{config_uri}`"))?;
	let config: NodeConfig =
		serde_yaml::from_slice(&config_content).with_context(|| format!("failed to parse node config YAML at `{config_uri}`"))?;
	info!(config_uri, node_id = %config.node_id, "loaded node config");
	Ok(config)
}
