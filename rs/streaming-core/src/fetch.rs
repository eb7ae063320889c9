//! The injected network fetch contract and cancellation support.
//!
//! A manual `Pin<Box<dyn Future>>` signature keeps the trait object-safe so
//! the coordinator and streams can hold `Arc<dyn Fetcher>` without pulling
//! in an async-trait macro dependency the rest of the workspace doesn't use.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::error::{Error, FetchStatus};

/// An inclusive-exclusive byte range for a partial segment fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
	pub start: u64,
	pub end: u64,
}

/// Cooperative cancellation handle for an in-flight fetch.
///
/// `cancel()` is idempotent; every pending [`CancelToken::cancelled`] future
/// resolves once it is called. A fetch that observes cancellation must
/// resolve with [`Error::Aborted`], which callers are required to swallow.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<Notify>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.notify_waiters();
	}

	pub async fn cancelled(&self) {
		self.0.notified().await;
	}
}

/// Supplies short-lived credentials to the fetcher without the core ever
/// reading them directly.
pub trait CredentialProvider: Send + Sync {
	fn authorize(&self, url: &str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// No-op provider for manifests/segments that need no authorization.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
	fn authorize(&self, _url: &str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
		Box::pin(async { None })
	}
}

/// Fetches manifest and media segment bytes.
///
/// Contract: on cancellation via the returned [`CancelToken`],
/// the future resolves with [`Error::Aborted`]; on an HTTP error, with
/// [`Error::StreamFetch`].
pub trait Fetcher: Send + Sync {
	fn fetch(
		&self,
		url: &str,
		range: Option<ByteRange>,
		cancel: CancelToken,
	) -> Pin<Box<dyn Future<Output = Result<Bytes, Error>> + Send + '_>>;
}

/// Retries `attempt` with exponential backoff + full jitter:
/// 3 attempts, base 500ms, factor 2. Transient errors are retried;
/// [`Error::Aborted`] is never retried and propagates immediately.
pub async fn fetch_with_retry(
	fetcher: &dyn Fetcher,
	url: &str,
	range: Option<ByteRange>,
	cancel: CancelToken,
) -> Result<Bytes, Error> {
	const ATTEMPTS: u32 = 3;
	const BASE_MS: u64 = 500;

	let mut last_err = None;
	for attempt in 0..ATTEMPTS {
		match fetcher.fetch(url, range, cancel.clone()).await {
			Ok(bytes) => return Ok(bytes),
			Err(Error::Aborted) => return Err(Error::Aborted),
			Err(err) => {
				last_err = Some(err);
				if attempt + 1 < ATTEMPTS {
					let max_delay_ms = BASE_MS * 2u64.pow(attempt);
					let jittered = rand::random::<f64>() * max_delay_ms as f64;
					tokio::time::sleep(std::time::Duration::from_millis(jittered as u64)).await;
				}
			}
		}
	}

	Err(last_err.unwrap_or(Error::StreamFetch {
		status: FetchStatus::Timeout,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct FlakyFetcher {
		calls: AtomicUsize,
		fail_until: usize,
	}

	impl Fetcher for FlakyFetcher {
		fn fetch(
			&self,
			_url: &str,
			_range: Option<ByteRange>,
			_cancel: CancelToken,
		) -> Pin<Box<dyn Future<Output = Result<Bytes, Error>> + Send + '_>> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			Box::pin(async move {
				if call < self.fail_until {
					Err(Error::StreamFetch {
						status: FetchStatus::Http(503),
					})
				} else {
					Ok(Bytes::from_static(b"ok"))
				}
			})
		}
	}

	#[tokio::test]
	async fn retries_transient_failures() {
		let fetcher = FlakyFetcher {
			calls: AtomicUsize::new(0),
			fail_until: 2,
		};
		let result = fetch_with_retry(&fetcher, "http://x/seg.mp4", None, CancelToken::new()).await;
		assert!(result.is_ok());
	}

	#[tokio::test]
	async fn gives_up_after_three_attempts() {
		let fetcher = FlakyFetcher {
			calls: AtomicUsize::new(0),
			fail_until: 10,
		};
		let result = fetch_with_retry(&fetcher, "http://x/seg.mp4", None, CancelToken::new()).await;
		assert!(result.is_err());
	}
}
