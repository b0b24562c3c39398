use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

use crate::cli::service::{build_serve_command, Serve};

pub fn build_cli() -> Command {
	Command::new("wf-node")
		.about("Workflow runtime node: process engine, event store, and RPC transports.")
		.arg(
			Arg::new("no-color")
				.long("no-color")
				.help("Disable ANSI terminal codes in logging output")
				.env("NO_COLOR")
				.value_parser(clap::builder::FalseyValueParser::new())
				.global(true)
				.action(ArgAction::SetTrue),
		)
		.subcommand(build_serve_command().display_order(1))
		.disable_help_subcommand(true)
}

#[derive(Debug, PartialEq)]
pub enum CliCommand {
	Serve(Serve),
}

impl CliCommand {
	pub fn default_log_level(&self) -> Level {
		match self {
			CliCommand::Serve(_) => Level::INFO,
		}
	}

	pub fn parse_cli_args(mut matches: ArgMatches) -> anyhow::Result<Self> {
		if matches.subcommand_name().is_none() {
			return Serve::parse_cli_args(ArgMatches::default()).map(CliCommand::Serve);
		}
		let (subcommand, submatches) = matches.remove_subcommand().unwrap_or_default();
		match subcommand.as_str() {
			"serve" => Serve::parse_cli_args(submatches).map(CliCommand::Serve),
			_ => Serve::parse_cli_args(submatches).map(CliCommand::Serve),
		}
	}

	pub async fn execute(self) -> anyhow::Result<()> {
		match self {
			CliCommand::Serve(subcommand) => subcommand.execute().await,
		}
	}
}
