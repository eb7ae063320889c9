//! Native helpers shared by binaries that embed the streaming core: a
//! `clap`-flattened logging config meant to be used as
//! `#[command(flatten)] log: Log` on a host binary's CLI, then
//! `cli.log.init()` before doing anything else.

use clap::Args;
use tracing_subscriber::EnvFilter;

/// Logging configuration, flattened into a host binary's `Cli` struct.
#[derive(Args, Clone, Debug)]
pub struct Log {
	/// Log level filter; overridden by `RUST_LOG` if set.
	#[arg(long, env = "RUST_LOG", default_value = "info")]
	pub level: String,

	/// Include target module paths in log output.
	#[arg(long)]
	pub log_targets: bool,
}

impl Log {
	/// Installs a `tracing_subscriber` registry using this config. Safe to
	/// call once per process; a second call is a no-op rather than a panic.
	pub fn init(&self) {
		let filter = EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"));

		let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(self.log_targets);

		let _ = subscriber.try_init();
	}
}

impl Default for Log {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			log_targets: false,
		}
	}
}
