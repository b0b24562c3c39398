use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/wf-node.yaml";

/// `x-tenant-id` etc. are read by the transports directly; everything that
/// tunes the runtime itself (mailbox sizing, snapshot cadence, connection
/// limits) lives here, loaded once at `serve` startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
	pub node_id: String,
	pub rest_config: RestConfig,
	pub realtime_config: RealtimeConfig,
	pub actor_config: ActorConfig,
	pub store_config: StoreConfig,
}

impl Default for NodeConfig {
	fn default() -> Self {
		NodeConfig {
			node_id: wf_common::new_quid("node"),
			rest_config: RestConfig::default(),
			realtime_config: RealtimeConfig::default(),
			actor_config: ActorConfig::default(),
			store_config: StoreConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
	pub listen_addr: String,
	pub listen_port: u16,
    pub cors_allow_origins: Vec<String>,
}

impl Default for RestConfig {
	fn default() -> Self {
		RestConfig {
			listen_addr: "0.0.0.0".to_string(),
			listen_port: 7280,
			cors_allow_origins: Vec::new(),
		}
	}
}

/// WebSocket/SSE tuning, per §4.5 and §5 capacity rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
	pub max_connections: usize,
	#[serde(with = "humantime_serde")]
	pub heartbeat_interval: Duration,
	#[serde(with = "humantime_serde")]
	pub connection_timeout: Duration,
	pub event_buffer_size: usize,
}

impl Default for RealtimeConfig {
	fn default() -> Self {
		RealtimeConfig {
			max_connections: 10_000,
			heartbeat_interval: Duration::from_secs(15),
			connection_timeout: Duration::from_secs(45),
			event_buffer_size: 1_024,
		}
	}
}

/// Per §4.1: mailbox bound, restart policy, and the default `ask` deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
	pub mailbox_capacity: usize,
	#[serde(with = "humantime_serde")]
	pub message_timeout: Duration,
	pub max_restarts: u32,
	#[serde(with = "humantime_serde")]
	pub base_backoff: Duration,
	#[serde(with = "humantime_serde")]
	pub max_backoff: Duration,
}

impl Default for ActorConfig {
	fn default() -> Self {
		ActorConfig {
			mailbox_capacity: 1_000,
			message_timeout: Duration::from_secs(30),
			max_restarts: 5,
			base_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_secs(10),
		}
	}
}

/// Per §4.2 snapshot policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
	pub snapshot_interval: u64,
	pub max_snapshot_age_versions: u64,
}

impl Default for StoreConfig {
	fn default() -> Self {
		StoreConfig { snapshot_interval: 100, max_snapshot_age_versions: 500 }
	}
}

/// A tiny `humantime`-backed serde module, since the workspace already
/// depends on `humantime` but not `humantime-serde`.
mod humantime_serde {
	use std::time::Duration;

	use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&humantime::format_duration(*duration).to_string())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		humantime::parse_duration(&raw).map_err(D::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_round_trips_through_yaml() {
		let config = NodeConfig::default();
		let encoded = serde_yaml::to_string(&config).unwrap();
		let decoded: NodeConfig = serde_yaml::from_str(&encoded).unwrap();
		assert_eq!(decoded.rest_config.listen_port, config.rest_config.listen_port);
		assert_eq!(decoded.actor_config.mailbox_capacity, config.actor_config.mailbox_capacity);
	}
}
