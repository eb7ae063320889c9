//! Demo binary: loads a manifest from disk, wires toy logging
//! [`streaming_core::sink::MediaSink`], [`streaming_core::fetch::Fetcher`],
//! and [`streaming_core::clock::Clock`] implementations, and drives a
//! [`streaming_core::coordinator::StreamCoordinator`] through a fixed
//! playback window, printing every event.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;

use streaming_core::clock::{Clock, TokioTimer};
use streaming_core::coordinator::{ManifestFetcher, StreamCoordinator};
use streaming_core::fetch::{ByteRange, CancelToken, Fetcher};
use streaming_core::manifest::{ContentType, Manifest};
use streaming_core::sink::{MediaSink, ReadyState, SinkEvent, TrackHandle};
use streaming_core::Error;

#[derive(Parser, Clone)]
struct Cli {
	#[command(flatten)]
	log: streaming_native::Log,

	/// Path to a manifest JSON file (see [`Manifest`]'s serde layout).
	#[arg(long)]
	manifest: PathBuf,

	/// BCP-47 preferred language for audio/text track selection.
	#[arg(long, default_value = "en")]
	language: String,

	/// How long to simulate playback for, in seconds.
	#[arg(long, default_value_t = 30.0)]
	play_seconds: f64,
}

struct NullFetcher;

impl Fetcher for NullFetcher {
	fn fetch(
		&self,
		url: &str,
		_range: Option<ByteRange>,
		_cancel: CancelToken,
	) -> Pin<Box<dyn Future<Output = Result<Bytes, Error>> + Send + '_>> {
		let url = url.to_string();
		Box::pin(async move {
			info!(%url, "fetch");
			Ok(Bytes::from_static(b""))
		})
	}
}

struct LoggingSink {
	playhead_bits: AtomicU64,
	sender: broadcast::Sender<SinkEvent>,
}

impl LoggingSink {
	fn new() -> Self {
		let (sender, _) = broadcast::channel(64);
		let _ = sender.send(SinkEvent::Open);
		Self {
			playhead_bits: AtomicU64::new(0.0_f64.to_bits()),
			sender,
		}
	}
}

impl MediaSink for LoggingSink {
	fn add_track(
		&self,
		content_type: ContentType,
		full_mime_type: &str,
	) -> Pin<Box<dyn Future<Output = Result<TrackHandle, Error>> + Send + '_>> {
		info!(?content_type, full_mime_type, "add_track");
		Box::pin(async { Ok(TrackHandle(0)) })
	}

	fn append(&self, handle: TrackHandle, bytes: Bytes) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
		info!(handle = handle.0, len = bytes.len(), "append");
		Box::pin(async { Ok(()) })
	}

	fn evict(&self, handle: TrackHandle, start: f64, end: f64) {
		info!(handle = handle.0, start, end, "evict");
	}

	fn set_timestamp_offset(&self, handle: TrackHandle, offset: f64) {
		info!(handle = handle.0, offset, "set_timestamp_offset");
	}

	fn set_duration(&self, duration: f64) {
		info!(duration, "set_duration");
	}

	fn seek(&self, position: f64) {
		info!(position, "seek");
		self.playhead_bits.store(position.to_bits(), Ordering::SeqCst);
	}

	fn end_of_stream(&self) {
		info!("end_of_stream");
	}

	fn ready_state(&self) -> ReadyState {
		ReadyState::Open
	}

	fn playhead(&self) -> f64 {
		f64::from_bits(self.playhead_bits.load(Ordering::SeqCst))
	}

	fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
		self.sender.subscribe()
	}
}

struct SystemClock;

impl Clock for SystemClock {
	fn monotonic_seconds(&self) -> f64 {
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
	}

	fn wall_clock_seconds(&self) -> f64 {
		self.monotonic_seconds()
	}
}

/// Re-reads the same manifest file; a stand-in for an HTTP refetch.
struct FileManifestFetcher(PathBuf);

impl ManifestFetcher for FileManifestFetcher {
	fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Manifest, Error>> + Send + '_>> {
		Box::pin(async move {
			let bytes = tokio::fs::read(&self.0).await.map_err(|err| Error::ManifestIncompatible {
				reason: err.to_string(),
			})?;
			Ok(serde_json::from_slice(&bytes)?)
		})
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	cli.log.init();

	let bytes = tokio::fs::read(&cli.manifest).await?;
	let manifest: Manifest = serde_json::from_slice(&bytes)?;

	let fetcher: Arc<dyn Fetcher> = Arc::new(NullFetcher);
	let sink: Arc<dyn MediaSink> = Arc::new(LoggingSink::new());
	let clock: Arc<dyn Clock> = Arc::new(SystemClock);
	let manifest_fetcher: Arc<dyn ManifestFetcher> = Arc::new(FileManifestFetcher(cli.manifest.clone()));

	let coordinator = Arc::new(StreamCoordinator::new(manifest, fetcher, sink, clock, Arc::new(TokioTimer), manifest_fetcher));

	let mut events = coordinator.events().subscribe();
	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			info!(?event, "event");
		}
	});

	coordinator.load(&cli.language, &|mime| mime.starts_with("video/mp4") || mime.starts_with("audio/mp4") || mime.starts_with("text/")).await?;
	coordinator.select_configurations().await?;
	coordinator.attach().await?;

	let update_loop = coordinator.clone().spawn_update_loop();

	let mut playhead = 0.0;
	while playhead < cli.play_seconds {
		tokio::time::sleep(Duration::from_millis(500)).await;
		playhead += 0.5;
		coordinator.on_time_update(playhead).await?;
	}

	update_loop.abort();
	coordinator.destroy().await;
	Ok(())
}
