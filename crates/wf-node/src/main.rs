use wf_node::cli::{build_cli, setup_logging_and_tracing, CliCommand};
use wf_node::tokio_runtime;

fn main() -> anyhow::Result<()> {
	let runtime = tokio_runtime()?;
	runtime.block_on(main_impl())
}

async fn main_impl() -> anyhow::Result<()> {
	setup_logging_and_tracing();

	let build_info = wf_node::build_info::BuildInfo::get();
	let version = format!("{} ({} {})", build_info.version, build_info.commit_short_hash, build_info.build_date);
	tracing::info!(%version, "starting workflow node");

	let app = build_cli().version(version);
	let matches = app.get_matches();
	let command = CliCommand::parse_cli_args(matches)?;

	if let Err(err) = command.execute().await {
		eprintln!("command failed: {err:?}");
		std::process::exit(1);
	}
	Ok(())
}
