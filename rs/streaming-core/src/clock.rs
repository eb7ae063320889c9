//! The injected scheduling primitives: a monotonic clock, a wall clock
//! (for live availability), and a one-shot timer. Kept as `dyn`-safe
//! traits so the coordinator can be driven by a real scheduler in
//! production and a deterministic fake one in tests.

use std::time::Duration;

/// Monotonic and wall-clock time, supplied by the host application.
pub trait Clock: Send + Sync {
	/// Seconds since an arbitrary, monotonic epoch. Never goes backwards.
	fn monotonic_seconds(&self) -> f64;

	/// Seconds since the Unix epoch, used to judge segment availability for
	/// dynamic/live manifests.
	fn wall_clock_seconds(&self) -> f64;
}

/// A one-shot timer, armed with a duration and fired once.
pub trait Timer: Send + Sync {
	fn sleep(&self, duration: Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
}

/// The default timer, backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

impl Timer for TokioTimer {
	fn sleep(&self, duration: Duration) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
		Box::pin(tokio::time::sleep(duration))
	}
}
