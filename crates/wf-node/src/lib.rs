pub mod app;
pub mod auth;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod events;
pub mod procedures;
pub mod process_actor;
pub mod serve;

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Runtime};

/// The main tokio runtime takes `num_cores / 3` threads by default, overridable
/// with `WF_RUNTIME_NUM_THREADS`.
fn main_runtime_num_threads() -> usize {
	let default_num_threads = (num_cpus::get() / 3).max(4);
	std::env::var("WF_RUNTIME_NUM_THREADS").ok().and_then(|raw| raw.parse().ok()).unwrap_or(default_num_threads)
}

pub fn tokio_runtime() -> anyhow::Result<&'static Runtime> {
	static RUNTIME: OnceCell<Runtime> = OnceCell::new();

	RUNTIME
		.get_or_try_init(|| {
			Builder::new_multi_thread().enable_all().worker_threads(main_runtime_num_threads()).build()
		})
		.map_err(|err| anyhow::anyhow!("failed to create tokio runtime: {err}"))
}
