use clap::{ArgMatches, Command};
use tokio::signal;
use tracing::{debug, info};

use crate::app::AppState;
use crate::cli::load_node_config;
use crate::config::DEFAULT_CONFIG_PATH;
use crate::procedures;
use crate::serve;

pub fn build_serve_command() -> Command {
	Command::new("serve")
		.about("Starts a workflow node.")
		.long_about("Starts a workflow node with the REST, WebSocket, and SSE transports enabled.")
		.arg(
			clap::Arg::new("config")
				.long("config")
				.help("Config file location")
				.env("WF_NODE_CONFIG")
				.default_value(DEFAULT_CONFIG_PATH)
				.display_order(1),
		)
}

#[derive(Debug, Eq, PartialEq)]
pub struct Serve {
	node_config_uri: String,
}

impl Serve {
	pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
		let config_uri = matches.try_remove_one::<String>("config").unwrap_or_default();
		Ok(Serve { node_config_uri: config_uri.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()) })
	}

	pub async fn execute(&self) -> anyhow::Result<()> {
		debug!(args = ?self, "run-serve-command");
		let node_config = load_node_config(&self.node_config_uri).await?;
		let state = AppState::build(node_config);
		procedures::register_all(&state)?;

		let shutdown_signal = async {
			signal::ctrl_c().await.expect("registering a SIGINT handler should not fail");
		};

		info!("starting workflow node");
		serve::serve(state, shutdown_signal).await?;
		info!("workflow node has shut down");
		Ok(())
	}
}
