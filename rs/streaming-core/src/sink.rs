//! The media sink contract: an append-only byte buffer per track
//! with `timestampOffset`, duration, seek position, and an end-of-stream
//! signal. The real implementation lives in the media element; this crate
//! only consumes it through [`MediaSink`].

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Error;
use crate::manifest::ContentType;

/// Opaque handle to a track registered with the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub u64);

/// Mirrors the W3C `MediaSource` ready states the coordinator needs to
/// reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
	Closed,
	Open,
	Ended,
}

/// Events the sink emits that the coordinator must react to.
#[derive(Debug, Clone, Copy)]
pub enum SinkEvent {
	Open,
	Seeking { to: f64 },
	TimeUpdate { playhead: f64 },
}

/// Append-only media sink, one track per content type.
pub trait MediaSink: Send + Sync {
	fn add_track(
		&self,
		content_type: ContentType,
		full_mime_type: &str,
	) -> Pin<Box<dyn Future<Output = Result<TrackHandle, Error>> + Send + '_>>;

	fn append(
		&self,
		handle: TrackHandle,
		bytes: Bytes,
	) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

	fn evict(&self, handle: TrackHandle, start: f64, end: f64);

	fn set_timestamp_offset(&self, handle: TrackHandle, offset: f64);

	fn set_duration(&self, duration: f64);

	fn seek(&self, position: f64);

	fn end_of_stream(&self);

	fn ready_state(&self) -> ReadyState;

	/// The sink's current playhead, in seconds.
	fn playhead(&self) -> f64;

	fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SinkEvent>;
}
