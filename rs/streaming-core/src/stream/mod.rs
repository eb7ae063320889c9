//! Stream: the per-content-type state machine that fetches, appends, and
//! evicts media, and handles ABR switching, resync, and end-of-stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::bandwidth::BandwidthEstimator;
use crate::clock::Clock;
use crate::error::{Error, FetchStatus, Result};
use crate::events::{Event, EventBus};
use crate::fetch::{fetch_with_retry, CancelToken, Fetcher};
use crate::manifest::{ContentType, StreamInfo};
use crate::segment::{SegmentIndex, SegmentReference};
use crate::sink::{MediaSink, TrackHandle};
use tracing::{debug, info, warn};

/// Backpressure window defaults.
pub const DEFAULT_BEHIND_SECONDS: f64 = 30.0;
pub const DEFAULT_AHEAD_SECONDS: f64 = 30.0;

/// The states of the per-type stream state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
	Idle,
	Starting,
	Buffering,
	Playing,
	/// Crosscutting substate: a switch is in flight, on the way back to
	/// `Playing` once the new representation's data has appended.
	Switching,
	Ended,
	Destroyed,
}

struct PendingSwitch {
	info: StreamInfo,
	index: SegmentIndex,
	immediate: bool,
}

struct Inner {
	state: StreamState,
	current_info: Option<StreamInfo>,
	current_index: Option<SegmentIndex>,
	track_handle: Option<TrackHandle>,
	/// The index of the next `SegmentReference` to fetch for the current
	/// representation.
	next_segment_index: u64,
	pending_switch: Option<PendingSwitch>,
	cancel: CancelToken,
	timestamp_correction: Option<f64>,
	is_live: bool,
}

/// One content type's fetch/append/evict state machine.
///
/// Holds no reference back to the coordinator beyond the capability subset
/// it actually needs (`EventBus`) — the coordinator is the sole owner
/// (design note: cyclic ownership is avoided by giving the Stream a weak
/// capability, not a strong back-reference).
pub struct Stream {
	content_type: ContentType,
	fetcher: Arc<dyn Fetcher>,
	sink: Arc<dyn MediaSink>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	bandwidth: Arc<BandwidthEstimator>,
	behind_seconds: f64,
	ahead_seconds: f64,
	inner: tokio::sync::Mutex<Inner>,
}

impl Stream {
	pub fn new(
		content_type: ContentType,
		fetcher: Arc<dyn Fetcher>,
		sink: Arc<dyn MediaSink>,
		clock: Arc<dyn Clock>,
		events: EventBus,
		bandwidth: Arc<BandwidthEstimator>,
		is_live: bool,
	) -> Self {
		Self {
			content_type,
			fetcher,
			sink,
			clock,
			events,
			bandwidth,
			behind_seconds: DEFAULT_BEHIND_SECONDS,
			ahead_seconds: DEFAULT_AHEAD_SECONDS,
			inner: tokio::sync::Mutex::new(Inner {
				state: StreamState::Idle,
				current_info: None,
				current_index: None,
				track_handle: None,
				next_segment_index: 0,
				pending_switch: None,
				cancel: CancelToken::new(),
				timestamp_correction: None,
				is_live,
			}),
		}
	}

	pub async fn state(&self) -> StreamState {
		self.inner.lock().await.state
	}

	pub async fn current_info(&self) -> Option<StreamInfo> {
		self.inner.lock().await.current_info.clone()
	}

	/// `Idle -> Starting`, or queues/performs a switch when already running.
	pub async fn switch(&self, info: StreamInfo, index: SegmentIndex, immediate: bool, playhead: f64) -> Result<()> {
		let mut guard = self.inner.lock().await;
		if guard.state == StreamState::Destroyed {
			return Err(Error::Destroyed);
		}

		if guard.state == StreamState::Idle {
			guard.current_info = Some(info);
			guard.current_index = Some(index);
			guard.state = StreamState::Starting;
			drop(guard);
			return self.start(playhead).await;
		}

		if !immediate {
			guard.pending_switch = Some(PendingSwitch { info, index, immediate });
			return Ok(());
		}

		// Immediate: abort in-flight fetch, clear anything buffered after
		// now + epsilon, and reset to fetch from the new representation at
		// the playhead (design note: source always clears on immediate
		// switch; an open question preserves that behavior here).
		guard.cancel.cancel();
		guard.cancel = CancelToken::new();
		if let Some(handle) = guard.track_handle {
			self.sink.evict(handle, playhead + f64::EPSILON, f64::MAX);
		}
		guard.current_info = Some(info);
		guard.current_index = Some(index);
		guard.pending_switch = None;
		guard.state = StreamState::Switching;
		let reference = guard
			.current_index
			.as_ref()
			.and_then(|idx| idx.find(playhead))
			.cloned();
		guard.next_segment_index = reference.as_ref().map(|r| r.index).unwrap_or(0);
		drop(guard);

		self.fetch_and_append(reference).await?;

		let mut guard = self.inner.lock().await;
		if guard.state == StreamState::Switching {
			guard.state = StreamState::Playing;
		}
		drop(guard);

		self.events.publish(Event::Adaptation {
			content_type: self.content_type,
			new_info: self.current_info().await.unwrap(),
		});

		Ok(())
	}

	/// `Playing -> Buffering`: abort in-flight, locate the reference
	/// containing the playhead, and refetch.
	pub async fn resync(&self, playhead: f64) -> Result<()> {
		let mut guard = self.inner.lock().await;
		if guard.state == StreamState::Destroyed || guard.state == StreamState::Idle {
			return Ok(());
		}
		guard.cancel.cancel();
		guard.cancel = CancelToken::new();
		guard.state = StreamState::Buffering;
		let reference = guard
			.current_index
			.as_ref()
			.and_then(|idx| idx.find(playhead))
			.cloned();
		guard.next_segment_index = reference.as_ref().map(|r| r.index).unwrap_or(0);
		drop(guard);

		self.fetch_and_append(reference).await
	}

	/// Runs the `Starting` sequence: create the track, fetch the first
	/// segment at `playhead`, append it, and measure the timestamp
	/// correction before transitioning to `Buffering`.
	async fn start(&self, playhead: f64) -> Result<()> {
		let info = self.current_info().await.expect("start() requires current_info to be set");

		let handle = self.sink.add_track(self.content_type, &info.full_mime_type).await?;
		{
			let mut guard = self.inner.lock().await;
			guard.track_handle = Some(handle);
		}

		if let Some(init_url) = info.init_segment_url.as_ref() {
			let cancel = self.inner.lock().await.cancel.clone();
			let init_bytes = fetch_with_retry(self.fetcher.as_ref(), init_url, None, cancel).await?;
			self.sink.append(handle, init_bytes).await.map_err(|_| Error::AppendFailed {
				reason: format!("{:?} init segment", self.content_type),
			})?;
		}

		let reference = {
			let guard = self.inner.lock().await;
			guard.current_index.as_ref().and_then(|idx| idx.find(playhead)).cloned()
		};

		let reference_start = reference.as_ref().map(|r| r.start_time).unwrap_or(playhead);
		self.fetch_and_append(reference).await?;

		let observed_start = self.sink.playhead().max(reference_start);
		let delta = observed_start - reference_start;

		{
			let mut guard = self.inner.lock().await;
			guard.timestamp_correction = Some(delta);
			guard.state = StreamState::Buffering;
		}

		info!(content_type = ?self.content_type, rep = info.unique_id, timestamp_correction = delta, "stream started");

		self.events.publish(Event::Started {
			content_type: self.content_type,
			timestamp_correction: delta,
		});

		Ok(())
	}

	/// Drives buffering given the current sink playhead: fetches ahead
	/// segments up to the target window, evicts behind ones, applies a
	/// queued non-immediate switch at the next boundary, transitions
	/// Buffering/Playing, and signals `Ended` for static manifests once the
	/// last segment has appended.
	pub async fn on_time_update(&self, playhead: f64) -> Result<()> {
		loop {
			let state = self.inner.lock().await.state;
			if matches!(state, StreamState::Idle | StreamState::Destroyed | StreamState::Ended) {
				return Ok(());
			}

			let (handle, is_live) = {
				let guard = self.inner.lock().await;
				(guard.track_handle, guard.is_live)
			};
			if let Some(handle) = handle {
				self.sink.evict(handle, f64::MIN, playhead - self.behind_seconds);
			}

			let target = playhead + self.ahead_seconds;
			let next = {
				let guard = self.inner.lock().await;
				guard
					.current_index
					.as_ref()
					.and_then(|idx| idx.all().iter().find(|r| r.index == guard.next_segment_index).cloned())
			};

			let Some(next_ref) = next else {
				// No more references currently known.
				if !is_live {
					self.finish_if_static().await;
				}
				break;
			};

			if next_ref.start_time > target {
				// Buffer is already full enough ahead of the playhead.
				let mut guard = self.inner.lock().await;
				if guard.state == StreamState::Buffering {
					guard.state = StreamState::Playing;
				}
				break;
			}

			// Apply a queued switch exactly at a segment boundary.
			let pending = self.inner.lock().await.pending_switch.is_some();
			if pending {
				let mut guard = self.inner.lock().await;
				if let Some(switch) = guard.pending_switch.take() {
					guard.current_info = Some(switch.info);
					guard.current_index = Some(switch.index);
					guard.state = StreamState::Switching;
					guard.next_segment_index = next_ref.index;
				}
				drop(guard);
				self.events.publish(Event::Adaptation {
					content_type: self.content_type,
					new_info: self.current_info().await.unwrap(),
				});
				continue;
			}

			if let Err(err) = self.fetch_and_append(Some(next_ref.clone())).await {
				// A persistent `StreamFetch` failure is fatal for static
				// content, but a live stream skips past the bad segment
				// rather than stalling the whole session.
				if is_live {
					warn!(content_type = ?self.content_type, segment = next_ref.index, error = %err, "skipping ahead past a persistently failing live segment");
					let mut guard = self.inner.lock().await;
					guard.next_segment_index = next_ref.index + 1;
					continue;
				}
				return Err(err);
			}
		}

		Ok(())
	}

	async fn finish_if_static(&self) {
		let mut guard = self.inner.lock().await;
		if guard.state != StreamState::Ended {
			guard.state = StreamState::Ended;
			drop(guard);
			debug!(content_type = ?self.content_type, "reached end of static segment index");
			self.events.publish(Event::Ended {
				content_type: self.content_type,
			});
		}
	}

	async fn fetch_and_append(&self, reference: Option<SegmentReference>) -> Result<()> {
		let Some(reference) = reference else { return Ok(()) };

		let cancel = self.inner.lock().await.cancel.clone();
		let started_at = self.clock.monotonic_seconds();
		let bytes = match fetch_with_retry(self.fetcher.as_ref(), &reference.url, None, cancel).await {
			Ok(bytes) => bytes,
			Err(Error::Aborted) => return Ok(()), // cancellation, not a failure
			Err(err) => {
				warn!(content_type = ?self.content_type, url = %reference.url, error = %err, "segment fetch failed");
				self.events.publish(Event::stream_fetch(
					self.content_type,
					FetchStatus::Network(err.to_string()),
				));
				return Err(err);
			}
		};

		let elapsed = self.clock.monotonic_seconds() - started_at;
		self.bandwidth.sample(bytes.len() as u64, elapsed);

		self.append(reference.index, bytes).await
	}

	async fn append(&self, segment_index: u64, bytes: Bytes) -> Result<()> {
		let handle = {
			let guard = self.inner.lock().await;
			guard.track_handle
		};
		let Some(handle) = handle else { return Ok(()) };

		self.sink
			.append(handle, bytes)
			.await
			.map_err(|_| Error::AppendFailed {
				reason: format!("{:?} segment {segment_index}", self.content_type),
			})?;

		let mut guard = self.inner.lock().await;
		guard.next_segment_index = segment_index + 1;
		Ok(())
	}

	/// Cancels in-flight fetches and tears the state machine down. Idempotent.
	pub async fn destroy(&self) {
		let mut guard = self.inner.lock().await;
		guard.cancel.cancel();
		guard.state = StreamState::Destroyed;
	}

	pub fn content_type(&self) -> ContentType {
		self.content_type
	}

	pub async fn timestamp_correction(&self) -> Option<f64> {
		self.inner.lock().await.timestamp_correction
	}

	/// Applies a global correction to this stream's index, once. No-op if
	/// the stream has not started yet.
	pub async fn correct_index(&self, delta: f64) {
		let mut guard = self.inner.lock().await;
		if let Some(index) = guard.current_index.as_mut() {
			index.correct(delta);
		}
		if let Some(handle) = guard.track_handle {
			self.sink.set_timestamp_offset(handle, delta);
		}
	}

	/// Grows the running segment index with a freshly re-derived snapshot
	/// from the same representation's source, so a live stream's lookahead
	/// doesn't stall once the initially-built index is exhausted. No-op if
	/// the stream hasn't started (no index to merge into yet).
	pub async fn merge_index(&self, fresh: SegmentIndex) {
		let mut guard = self.inner.lock().await;
		if let Some(index) = guard.current_index.as_mut() {
			index.merge(fresh);
		}
	}

	#[cfg(test)]
	pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}
}

/// Exponential backoff delay for retry scheduling outside of
/// [`fetch_with_retry`] (used by tests and the coordinator's live-update
/// backoff).
pub fn backoff_delay(attempt: u32) -> Duration {
	Duration::from_millis(500 * 2u64.pow(attempt))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::future::Future;
	use std::pin::Pin;
	use std::sync::atomic::{AtomicU64, AtomicUsize};

	use crate::clock::tests::FixedClock;
	use crate::fetch::{ByteRange, CancelToken};
	use crate::manifest::ContentType;
	use crate::sink::{ReadyState, SinkEvent};

	struct StubFetcher;

	impl Fetcher for StubFetcher {
		fn fetch(
			&self,
			_url: &str,
			_range: Option<ByteRange>,
			_cancel: CancelToken,
		) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + '_>> {
			Box::pin(async { Ok(Bytes::from_static(b"segment")) })
		}
	}

	struct StubSink {
		playhead_bits: AtomicU64,
		appended: AtomicUsize,
		evictions: tokio::sync::Mutex<Vec<(f64, f64)>>,
		sender: tokio::sync::broadcast::Sender<SinkEvent>,
	}

	impl StubSink {
		fn new() -> Self {
			let (sender, _) = tokio::sync::broadcast::channel(16);
			Self {
				playhead_bits: AtomicU64::new(0.0_f64.to_bits()),
				appended: AtomicUsize::new(0),
				evictions: tokio::sync::Mutex::new(Vec::new()),
				sender,
			}
		}

		fn set_playhead(&self, t: f64) {
			self.playhead_bits.store(t.to_bits(), std::sync::atomic::Ordering::SeqCst);
		}

		fn appended_count(&self) -> usize {
			self.appended.load(std::sync::atomic::Ordering::SeqCst)
		}
	}

	impl MediaSink for StubSink {
		fn add_track(
			&self,
			_content_type: ContentType,
			_full_mime_type: &str,
		) -> Pin<Box<dyn Future<Output = Result<TrackHandle>> + Send + '_>> {
			Box::pin(async { Ok(TrackHandle(1)) })
		}

		fn append(&self, _handle: TrackHandle, _bytes: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
			self.appended.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			Box::pin(async { Ok(()) })
		}

		fn evict(&self, _handle: TrackHandle, start: f64, end: f64) {
			if let Ok(mut guard) = self.evictions.try_lock() {
				guard.push((start, end));
			}
		}

		fn set_timestamp_offset(&self, _handle: TrackHandle, _offset: f64) {}

		fn set_duration(&self, _duration: f64) {}

		fn seek(&self, position: f64) {
			self.set_playhead(position);
		}

		fn end_of_stream(&self) {}

		fn ready_state(&self) -> ReadyState {
			ReadyState::Open
		}

		fn playhead(&self) -> f64 {
			f64::from_bits(self.playhead_bits.load(std::sync::atomic::Ordering::SeqCst))
		}

		fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SinkEvent> {
			self.sender.subscribe()
		}
	}

	fn info(id: u64) -> StreamInfo {
		StreamInfo {
			unique_id: id,
			full_mime_type: "video/mp4".into(),
			bandwidth: 1_000_000,
			width: Some(1280),
			height: Some(720),
			timestamp_offset: 0.0,
			segment_index_source: None,
			init_segment_url: None,
			enabled: true,
		}
	}

	fn index(pairs: &[(f64, f64)]) -> SegmentIndex {
		let refs = pairs
			.iter()
			.enumerate()
			.map(|(i, (start, end))| SegmentReference {
				index: i as u64,
				start_time: *start,
				end_time: Some(*end),
				url: format!("seg{i}.mp4"),
				byte_range: None,
			})
			.collect();
		SegmentIndex::new(refs)
	}

	fn new_stream(is_live: bool) -> Stream {
		Stream::new(
			ContentType::Video,
			Arc::new(StubFetcher),
			Arc::new(StubSink::new()),
			Arc::new(FixedClock::default()),
			EventBus::new(),
			Arc::new(BandwidthEstimator::default()),
			is_live,
		)
	}

	fn new_stream_with_sink(is_live: bool) -> (Stream, Arc<StubSink>) {
		let sink = Arc::new(StubSink::new());
		let stream = Stream::new(
			ContentType::Video,
			Arc::new(StubFetcher),
			sink.clone(),
			Arc::new(FixedClock::default()),
			EventBus::new(),
			Arc::new(BandwidthEstimator::default()),
			is_live,
		);
		(stream, sink)
	}

	#[tokio::test]
	async fn start_fetches_and_appends_init_segment_before_first_media_segment() {
		let (stream, sink) = new_stream_with_sink(false);
		let mut with_init = info(1);
		with_init.init_segment_url = Some("init.mp4".into());
		stream.switch(with_init, index(&[(0.0, 6.0), (6.0, 12.0)]), false, 0.0).await.unwrap();
		assert_eq!(sink.appended_count(), 2);
	}

	#[tokio::test]
	async fn switch_from_idle_starts_and_buffers() {
		let stream = new_stream(false);
		stream.switch(info(1), index(&[(0.0, 6.0), (6.0, 12.0)]), false, 0.0).await.unwrap();
		assert_eq!(stream.state().await, StreamState::Buffering);
		assert_eq!(stream.current_info().await.unwrap().unique_id, 1);
	}

	#[tokio::test]
	async fn static_stream_ends_once_fully_buffered() {
		let stream = new_stream(false);
		stream.switch(info(1), index(&[(0.0, 6.0), (6.0, 12.0)]), false, 0.0).await.unwrap();
		stream.on_time_update(0.0).await.unwrap();
		assert_eq!(stream.state().await, StreamState::Ended);
	}

	#[tokio::test]
	async fn live_stream_never_self_ends_on_empty_lookahead() {
		let stream = new_stream(true);
		stream.switch(info(1), index(&[(0.0, 6.0)]), false, 0.0).await.unwrap();
		stream.on_time_update(0.0).await.unwrap();
		assert_eq!(stream.state().await, StreamState::Buffering);
	}

	#[tokio::test]
	async fn immediate_switch_replaces_representation_at_once() {
		let stream = new_stream(false);
		stream.switch(info(1), index(&[(0.0, 6.0), (6.0, 60.0)]), false, 0.0).await.unwrap();
		stream.switch(info(2), index(&[(0.0, 6.0), (6.0, 60.0)]), true, 0.0).await.unwrap();
		assert_eq!(stream.current_info().await.unwrap().unique_id, 2);
		assert_eq!(stream.state().await, StreamState::Playing);
	}

	#[tokio::test]
	async fn non_immediate_switch_is_queued_until_the_next_boundary() {
		let stream = new_stream(false);
		stream.switch(info(1), index(&[(0.0, 6.0), (6.0, 60.0)]), false, 0.0).await.unwrap();
		stream.switch(info(2), index(&[(0.0, 6.0), (6.0, 60.0)]), false, 0.0).await.unwrap();
		// Not applied yet: still representation 1 until on_time_update drains
		// the pending switch at a segment boundary.
		assert_eq!(stream.current_info().await.unwrap().unique_id, 1);
		stream.on_time_update(0.0).await.unwrap();
		assert_eq!(stream.current_info().await.unwrap().unique_id, 2);
	}

	#[tokio::test]
	async fn destroy_is_idempotent() {
		let stream = new_stream(false);
		stream.switch(info(1), index(&[(0.0, 6.0)]), false, 0.0).await.unwrap();
		stream.destroy().await;
		stream.destroy().await;
		assert_eq!(stream.state().await, StreamState::Destroyed);
	}

	#[test]
	fn backoff_grows_exponentially() {
		assert_eq!(backoff_delay(0), Duration::from_millis(500));
		assert_eq!(backoff_delay(1), Duration::from_millis(1000));
		assert_eq!(backoff_delay(2), Duration::from_millis(2000));
	}
}
