//! Stream Coordinator: owns one `Stream` per active content type, selects
//! representations from the processed manifest, computes the common play
//! window, and drives start/seek/end-of-stream/update.

mod window;

pub use window::PlayWindow;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::abr::AbrManager;
use crate::bandwidth::BandwidthEstimator;
use crate::clock::{Clock, Timer};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::fetch::Fetcher;
use crate::language;
use crate::manifest::{ContentType, Manifest, ManifestProcessor, ManifestUpdater, Restrictions, StreamSetsByType, TypeSupport};
use crate::sink::{MediaSink, ReadyState, SinkEvent};
use crate::stream::Stream;

/// Injected hook used by the live-update loop to refetch the manifest.
/// Mirrors [`crate::fetch::Fetcher`]'s manual boxed-future signature to
/// stay `dyn`-safe.
pub trait ManifestFetcher: Send + Sync {
	fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Manifest>> + Send + '_>>;
}

/// A materialised view over one selectable representation, for
/// `video_tracks()` / `audio_tracks()` / `text_tracks()`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackView {
	pub unique_id: u64,
	pub content_type: ContentType,
	pub lang: Option<String>,
	pub bandwidth: u64,
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub active: bool,
}

struct State {
	manifest: Option<Manifest>,
	loaded: bool,
	preferred_language: String,
	stream_sets_by_type: StreamSetsByType,
	active_info: HashMap<ContentType, u64>,
	streams: HashMap<ContentType, Arc<Stream>>,
	restrictions: Restrictions,
	text_enabled: bool,
	ignored_first_seek: bool,
}

/// Owns the set of per-type `Stream`s and drives coordinated playback.
pub struct StreamCoordinator {
	fetcher: Arc<dyn Fetcher>,
	sink: Arc<dyn MediaSink>,
	clock: Arc<dyn Clock>,
	timer: Arc<dyn Timer>,
	manifest_fetcher: Arc<dyn ManifestFetcher>,
	abr: Arc<AbrManager>,
	bandwidth: Arc<BandwidthEstimator>,
	events: EventBus,
	destroyed: AtomicBool,
	state: Mutex<State>,
}

impl StreamCoordinator {
	pub fn new(
		manifest: Manifest,
		fetcher: Arc<dyn Fetcher>,
		sink: Arc<dyn MediaSink>,
		clock: Arc<dyn Clock>,
		timer: Arc<dyn Timer>,
		manifest_fetcher: Arc<dyn ManifestFetcher>,
	) -> Self {
		Self {
			fetcher,
			sink,
			clock,
			timer,
			manifest_fetcher,
			abr: Arc::new(AbrManager::new()),
			bandwidth: Arc::new(BandwidthEstimator::default()),
			events: EventBus::new(),
			destroyed: AtomicBool::new(false),
			state: Mutex::new(State {
				manifest: Some(manifest),
				loaded: false,
				preferred_language: String::new(),
				stream_sets_by_type: StreamSetsByType::new(),
				active_info: HashMap::new(),
				streams: HashMap::new(),
				restrictions: Restrictions::default(),
				text_enabled: true,
				ignored_first_seek: false,
			}),
		}
	}

	pub fn events(&self) -> EventBus {
		self.events.clone()
	}

	fn check_alive(&self) -> Result<()> {
		if self.destroyed.load(Ordering::Acquire) {
			return Err(Error::Destroyed);
		}
		Ok(())
	}

	/// Runs the manifest processor, remembers the preferred language, and
	/// marks the coordinator loaded.
	pub async fn load(&self, preferred_language: &str, supports: TypeSupport<'_>) -> Result<()> {
		self.check_alive()?;
		let mut state = self.state.lock().await;
		if state.loaded {
			return Err(Error::AlreadyLoaded);
		}

		let manifest = state.manifest.as_mut().ok_or(Error::Destroyed)?;
		ManifestProcessor::process(manifest, supports)?;

		state.preferred_language = preferred_language.to_string();
		state.loaded = true;
		info!(preferred_language, periods = state.manifest.as_ref().map(|m| m.periods.len()).unwrap_or(0), "manifest loaded");
		Ok(())
	}

	/// Groups one period's stream sets by content type and orders audio/text
	/// by language preference. Shared by the initial selection and every
	/// manifest-update cycle, so a live update's replacement/refresh logic
	/// sees the same freshly-ordered view a fresh `select_configurations`
	/// call would produce.
	fn group_stream_sets(manifest: &Manifest, preferred_language: &str) -> Result<StreamSetsByType> {
		let period = manifest.periods.first().ok_or(Error::ManifestEmpty)?;

		let mut by_type: StreamSetsByType = StreamSetsByType::new();
		for set in &period.stream_sets {
			by_type.entry(set.content_type).or_default().push(set.clone());
		}

		if let Some(audio) = by_type.get_mut(&ContentType::Audio) {
			language::order_by_preference(audio, preferred_language);
		}
		if let Some(text) = by_type.get_mut(&ContentType::Text) {
			language::order_by_preference(text, preferred_language);
		}

		Ok(by_type)
	}

	/// Selection policy: one video set, all MIME-compatible audio sets, all
	/// text sets; audio/text ordered by language preference. Text is
	/// disabled by default when the best-ranked audio set's language
	/// already matches the preferred language, since subtitles are
	/// redundant with native-language audio.
	pub async fn select_configurations(&self) -> Result<()> {
		self.check_alive()?;
		let mut state = self.state.lock().await;
		if !state.loaded {
			return Err(Error::NotLoaded);
		}

		let manifest = state.manifest.as_ref().ok_or(Error::Destroyed)?;
		let preferred = state.preferred_language.clone();
		let by_type = Self::group_stream_sets(manifest, &preferred)?;

		let audio_matches_preferred = by_type
			.get(&ContentType::Audio)
			.and_then(|sets| sets.first())
			.and_then(|set| set.lang.as_deref())
			.is_some_and(|lang| language::fuzz_level(lang, &preferred).is_some());

		state.stream_sets_by_type = by_type;
		if audio_matches_preferred {
			state.text_enabled = false;
		}
		drop(state);

		self.events.publish(Event::TracksChanged);
		Ok(())
	}

	pub async fn configurations(&self) -> StreamSetsByType {
		self.state.lock().await.stream_sets_by_type.clone()
	}

	/// Binds to the media sink, waits for it to open, then runs the start
	/// sequence. Returns once the first bytes have appended to every
	/// active stream.
	pub async fn attach(&self) -> Result<()> {
		self.check_alive()?;

		if self.sink.ready_state() != ReadyState::Open {
			let mut events = self.sink.subscribe();
			loop {
				match events.recv().await {
					Ok(SinkEvent::Open) => break,
					Ok(_) => continue,
					Err(_) => break,
				}
			}
		}

		self.start_streams().await
	}

	/// The start sequence: pick an initial representation per type, build
	/// indices, compute the window, instantiate Streams, start them, then
	/// apply the shared timestamp correction once every stream has
	/// reported `started`.
	async fn start_streams(&self) -> Result<()> {
		let (manifest_is_live, min_buffer_time, period_duration, selections) = {
			let state = self.state.lock().await;
			let manifest = state.manifest.as_ref().ok_or(Error::Destroyed)?;
			let period = manifest.periods.first().ok_or(Error::ManifestEmpty)?;

			let mut selections = Vec::new();
			for content_type in ContentType::ALL {
				if content_type == ContentType::Text && !state.text_enabled {
					continue;
				}
				let Some(sets) = state.stream_sets_by_type.get(&content_type) else {
					continue;
				};
				let Some(set) = sets.first() else { continue };
				if set.streams.is_empty() {
					continue;
				}

				let initial_id = match content_type {
					ContentType::Video => self.abr.initial_video_id(set, self.bandwidth.estimate().max(1.0)),
					ContentType::Audio => set.streams[set.streams.len() / 2].unique_id,
					ContentType::Text => set.streams[0].unique_id,
				};

				let Some(info) = set.streams.iter().find(|s| s.unique_id == initial_id && s.enabled).cloned() else {
					continue;
				};
				selections.push((content_type, set.clone(), info));
			}

			(manifest.is_live(), manifest.min_buffer_time, period.duration, selections)
		};

		if selections.is_empty() {
			warn!("no content type had a selectable representation");
			return Err(Error::StreamsNotAvailable);
		}

		// Build every selected representation's index (conceptually in
		// parallel; sequential here keeps ordering deterministic for tests,
		// each `create()` already suspends independently at its own await
		// point).
		let mut indices = Vec::new();
		for (content_type, set, info) in &selections {
			let source = info
				.segment_index_source
				.as_ref()
				.ok_or(Error::StreamsNotAvailable)?;
			let index = source.create(self.clock.as_ref()).await?;
			if index.is_empty() {
				return Err(Error::StreamsNotAvailable);
			}
			indices.push((*content_type, set.clone(), info.clone(), index));
		}

		let window = window::compute_play_window(
			indices.iter().map(|(_, _, _, idx)| idx),
			manifest_is_live,
			min_buffer_time,
			period_duration,
		)
		.ok_or(Error::StreamsNotAvailable)?;

		self.sink.set_duration(period_duration.unwrap_or(window.end));
		self.sink.seek(if manifest_is_live { window.end } else { window.start });

		let mut streams = HashMap::new();
		for (content_type, _set, info, index) in indices {
			let stream = Arc::new(Stream::new(
				content_type,
				self.fetcher.clone(),
				self.sink.clone(),
				self.clock.clone(),
				self.events.clone(),
				self.bandwidth.clone(),
				manifest_is_live,
			));
			stream.switch(info.clone(), index, false, self.sink.playhead()).await?;
			{
				let mut state = self.state.lock().await;
				state.active_info.insert(content_type, info.unique_id);
			}
			streams.insert(content_type, stream);
		}

		let corrections: Vec<f64> = {
			let mut out = Vec::new();
			for stream in streams.values() {
				out.push(stream.timestamp_correction().await.unwrap_or(0.0));
			}
			out
		};

		let max_correction = corrections.iter().cloned().fold(f64::MIN, f64::max);
		let min_correction = corrections.iter().cloned().fold(f64::MAX, f64::min);
		if max_correction.is_finite() && min_correction.is_finite() && max_correction.signum() != min_correction.signum() && max_correction != 0.0 && min_correction != 0.0 {
			self.events.publish(Event::Error {
				kind: crate::events::ErrorKind::StreamsNotAvailable,
				message: "streams disagree on the sign of the timestamp correction".into(),
			});
		}

		if max_correction.is_finite() && max_correction != 0.0 {
			for stream in streams.values() {
				stream.correct_index(max_correction).await;
			}
			self.sink.seek(self.sink.playhead() + max_correction);
		}

		{
			let mut state = self.state.lock().await;
			state.streams = streams;
		}

		info!(start = window.start, end = window.end, live = manifest_is_live, "playback started");
		Ok(())
	}

	/// Lists video representations, with the active one flagged.
	pub async fn video_tracks(&self) -> Vec<TrackView> {
		self.tracks_for(ContentType::Video).await
	}

	pub async fn audio_tracks(&self) -> Vec<TrackView> {
		self.tracks_for(ContentType::Audio).await
	}

	pub async fn text_tracks(&self) -> Vec<TrackView> {
		self.tracks_for(ContentType::Text).await
	}

	async fn tracks_for(&self, content_type: ContentType) -> Vec<TrackView> {
		let state = self.state.lock().await;
		let active = state.active_info.get(&content_type).copied();

		let mut out = Vec::new();
		if let Some(sets) = state.stream_sets_by_type.get(&content_type) {
			for set in sets {
				for info in &set.streams {
					if !info.enabled {
						continue;
					}
					out.push(TrackView {
						unique_id: info.unique_id,
						content_type,
						lang: set.lang.clone(),
						bandwidth: info.bandwidth,
						width: info.width,
						height: info.height,
						active: Some(info.unique_id) == active,
					});
				}
			}
		}
		out
	}

	pub async fn select_video_track(&self, id: u64, immediate: bool) -> bool {
		self.select_track(ContentType::Video, id, immediate).await
	}

	pub async fn select_audio_track(&self, id: u64, immediate: bool) -> bool {
		self.select_track(ContentType::Audio, id, immediate).await
	}

	pub async fn select_text_track(&self, id: u64, immediate: bool) -> bool {
		self.select_track(ContentType::Text, id, immediate).await
	}

	async fn select_track(&self, content_type: ContentType, id: u64, immediate: bool) -> bool {
		let (info, stream) = {
			let state = self.state.lock().await;
			let Some(stream) = state.streams.get(&content_type).cloned() else {
				return false;
			};
			let Some(info) = state
				.stream_sets_by_type
				.get(&content_type)
				.into_iter()
				.flatten()
				.flat_map(|s| s.streams.iter())
				.find(|s| s.unique_id == id)
				.cloned()
			else {
				return false;
			};
			(info, stream)
		};

		let Some(source) = info.segment_index_source.clone() else {
			return false;
		};
		let Ok(index) = source.create(self.clock.as_ref()).await else {
			return false;
		};

		let playhead = self.sink.playhead();
		if stream.switch(info.clone(), index, immediate, playhead).await.is_err() {
			return false;
		}

		let mut state = self.state.lock().await;
		state.active_info.insert(content_type, id);
		drop(state);
		self.events.publish(Event::TracksChanged);
		true
	}

	pub async fn enable_text_track(&self, enabled: bool) {
		let mut state = self.state.lock().await;
		state.text_enabled = enabled;
	}

	pub fn enable_adaptation(&self, enabled: bool) {
		self.abr.enable(enabled);
	}

	/// Applies restrictions to every stream info; switches any
	/// now-disabled active representation to the best enabled peer, per
	/// type.
	pub async fn set_restrictions(&self, restrictions: Restrictions) -> Result<()> {
		self.check_alive()?;
		let mut state = self.state.lock().await;
		state.restrictions = restrictions;

		let manifest = state.manifest.as_mut().ok_or(Error::Destroyed)?;
		for period in &mut manifest.periods {
			for set in &mut period.stream_sets {
				for info in &mut set.streams {
					info.enabled = restrictions.allows(info);
				}
			}
		}

		// Propagate into the cached selection too.
		for sets in state.stream_sets_by_type.values_mut() {
			for set in sets.iter_mut() {
				for info in &mut set.streams {
					info.enabled = restrictions.allows(info);
				}
			}
		}

		let mut to_switch = Vec::new();
		for (&content_type, &active_id) in state.active_info.clone().iter() {
			let still_enabled = state
				.stream_sets_by_type
				.get(&content_type)
				.into_iter()
				.flatten()
				.flat_map(|s| s.streams.iter())
				.any(|s| s.unique_id == active_id && s.enabled);

			if !still_enabled {
				let replacement = state
					.stream_sets_by_type
					.get(&content_type)
					.into_iter()
					.flatten()
					.flat_map(|s| s.streams.iter())
					.filter(|s| s.enabled)
					.max_by_key(|s| s.bandwidth)
					.map(|s| s.unique_id);
				if let Some(replacement) = replacement {
					to_switch.push((content_type, replacement));
				}
			}
		}
		drop(state);

		if to_switch.is_empty() {
			return Ok(());
		}

		for (content_type, replacement) in to_switch {
			if !self.select_track(content_type, replacement, true).await {
				return Err(Error::NoPlayableStream);
			}
		}

		Ok(())
	}

	/// Called on the sink's `seeking` event; resyncs every stream, ignoring
	/// the coordinator's own start-sequence seek.
	pub async fn on_seeking(&self, to: f64) -> Result<()> {
		let mut state = self.state.lock().await;
		if !state.ignored_first_seek {
			state.ignored_first_seek = true;
			return Ok(());
		}
		let streams: Vec<_> = state.streams.values().cloned().collect();
		drop(state);

		for stream in streams {
			stream.resync(to).await?;
		}
		Ok(())
	}

	/// Called on the sink's `time_update` event; drives every stream's
	/// buffering loop, re-evaluates the ongoing ABR decision for video, and
	/// signals end-of-stream once all streams have ended.
	///
	/// A persistent segment-fetch failure bubbles up from a static stream as
	/// fatal; a live stream already skipped past the bad segment internally
	/// and never returns an error for it.
	pub async fn on_time_update(&self, playhead: f64) -> Result<()> {
		let streams: Vec<_> = self.state.lock().await.streams.values().cloned().collect();
		for stream in &streams {
			stream.on_time_update(playhead).await?;
		}

		self.reevaluate_abr().await;

		if !streams.is_empty() {
			let mut all_ended = true;
			for stream in &streams {
				if stream.state().await != crate::stream::StreamState::Ended {
					all_ended = false;
					break;
				}
			}
			if all_ended && self.sink.ready_state() == ReadyState::Open {
				self.sink.end_of_stream();
			}
		}

		Ok(())
	}

	/// Re-runs the ABR manager's ongoing `choose` policy against the current
	/// bandwidth estimate for the active video representation, and queues a
	/// non-immediate switch if it picks a different one. A no-op when ABR
	/// is disabled, no video stream is active, or `choose` keeps the
	/// current representation.
	async fn reevaluate_abr(&self) {
		let (set, current_id) = {
			let state = self.state.lock().await;
			let Some(&current_id) = state.active_info.get(&ContentType::Video) else {
				return;
			};
			let Some(set) = state
				.stream_sets_by_type
				.get(&ContentType::Video)
				.and_then(|sets| sets.first())
				.cloned()
			else {
				return;
			};
			(set, current_id)
		};

		let estimate = self.bandwidth.estimate();
		let now = self.clock.monotonic_seconds();
		let chosen = self.abr.choose(&set, estimate, current_id, now);
		if chosen == current_id {
			return;
		}

		self.select_video_track(chosen, false).await;
	}

	pub async fn is_live(&self) -> bool {
		self.state
			.lock()
			.await
			.manifest
			.as_ref()
			.map(|m| m.is_live())
			.unwrap_or(false)
	}

	pub async fn resume_threshold(&self) -> f64 {
		self.state
			.lock()
			.await
			.manifest
			.as_ref()
			.map(|m| m.min_buffer_time)
			.unwrap_or(0.0)
	}

	/// One manifest-update cycle. Not self-rescheduling: the host
	/// application's scheduler is expected to call this again after the
	/// returned delay, the same single-external-scheduler model the rest
	/// of the core assumes.
	pub async fn run_update_cycle(&self) -> Result<Duration> {
		self.check_alive()?;

		let update_period = {
			let state = self.state.lock().await;
			state.manifest.as_ref().and_then(|m| m.update_period)
		};
		let Some(update_period) = update_period else {
			return Ok(Duration::from_secs(3));
		};

		let fetch_result = self.manifest_fetcher.fetch().await;
		let mut new_manifest = match fetch_result {
			Ok(m) => m,
			Err(Error::Aborted) => return Ok(Duration::from_secs_f64(update_period.max(3.0))),
			Err(err) => {
				self.events.publish(Event::Error {
					kind: crate::events::ErrorKind::StreamFetch,
					message: err.to_string(),
				});
				return Ok(Duration::from_secs(3));
			}
		};

		let mut state = self.state.lock().await;
		let Some(old_manifest) = state.manifest.take() else {
			return Ok(Duration::from_secs(3));
		};

		let update = match ManifestUpdater::merge(&old_manifest, &mut new_manifest) {
			Ok(update) => update,
			Err(err) => {
				state.manifest = Some(old_manifest);
				drop(state);
				self.events.publish(Event::Error {
					kind: crate::events::ErrorKind::ManifestIncompatible,
					message: err.to_string(),
				});
				return Ok(Duration::from_secs(3));
			}
		};

		state.manifest = Some(new_manifest);

		let preferred = state.preferred_language.clone();
		let fresh_sets = match Self::group_stream_sets(state.manifest.as_ref().expect("just set above"), &preferred) {
			Ok(sets) => sets,
			Err(err) => {
				drop(state);
				self.events.publish(Event::Error {
					kind: crate::events::ErrorKind::ManifestIncompatible,
					message: err.to_string(),
				});
				return Ok(Duration::from_secs(3));
			}
		};
		state.stream_sets_by_type = fresh_sets;

		info!(removed = update.removed.len(), "manifest update applied");
		let restrictions = state.restrictions;
		let active = state.active_info.clone();
		let streams = state.streams.clone();
		drop(state);

		// A removed representation that was active loses its stream: switch
		// to the best surviving enabled peer if one exists, or tear that
		// content type's stream down entirely if it doesn't. Either way,
		// `select_track` (replacement found) or `destroy` (no replacement)
		// is the only thing that touches that stream — never both, since
		// `select_track` already reused the same `Arc<Stream>` in place.
		let mut replaced_types = std::collections::HashSet::new();
		for removed in &update.removed {
			let mut affected = None;
			for (ct, stream) in streams.iter() {
				if active.get(ct) == Some(&removed.unique_id) {
					affected = Some((*ct, stream.clone()));
					break;
				}
			}

			let Some((content_type, stream)) = affected else { continue };

			let replacement = self
				.state
				.lock()
				.await
				.stream_sets_by_type
				.get(&content_type)
				.into_iter()
				.flatten()
				.flat_map(|s| s.streams.iter())
				.filter(|s| s.enabled && s.unique_id != removed.unique_id)
				.max_by_key(|s| s.bandwidth)
				.map(|s| s.unique_id);

			match replacement {
				Some(id) => {
					let _ = self.select_track(content_type, id, true).await;
					replaced_types.insert(content_type);
				}
				None => {
					self.events.publish(Event::Error {
						kind: crate::events::ErrorKind::NoPlayableStream,
						message: format!("{content_type:?} representation removed with no replacement"),
					});
					stream.destroy().await;
					let mut state = self.state.lock().await;
					state.streams.remove(&content_type);
					state.active_info.remove(&content_type);
				}
			}
		}

		self.set_restrictions(restrictions).await.ok();

		// Every surviving stream (not just-replaced, which already got a
		// brand new index from `select_track`) grows its running index
		// against the freshly re-derived source, so a long-running live
		// stream's lookahead doesn't stall once its initial index is spent.
		let (active_after, sets_after, streams_after) = {
			let state = self.state.lock().await;
			(state.active_info.clone(), state.stream_sets_by_type.clone(), state.streams.clone())
		};
		for (content_type, stream) in streams_after.iter() {
			if replaced_types.contains(content_type) {
				continue;
			}
			let Some(&id) = active_after.get(content_type) else { continue };
			let source = sets_after
				.get(content_type)
				.into_iter()
				.flatten()
				.flat_map(|s| s.streams.iter())
				.find(|s| s.unique_id == id)
				.and_then(|s| s.segment_index_source.clone());
			let Some(source) = source else { continue };
			if let Ok(fresh) = source.refresh(self.clock.as_ref()).await {
				stream.merge_index(fresh).await;
			}
		}

		let has_streams = !self.state.lock().await.streams.is_empty();
		if !has_streams {
			let _ = self.start_streams().await;
		}

		Ok(Duration::from_secs_f64(update_period.max(3.0)))
	}

	/// Spawns a background task that repeatedly drives the live-update
	/// loop: runs one cycle, arms the injected [`Timer`] for the returned
	/// delay, and repeats. Exits once the coordinator is destroyed.
	pub fn spawn_update_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			loop {
				match self.run_update_cycle().await {
					Ok(delay) => self.timer.sleep(delay).await,
					Err(Error::Destroyed) => break,
					Err(_) => continue,
				}
			}
		})
	}

	/// Cancels everything and tears the coordinator down. Idempotent; after
	/// this, every other method returns [`Error::Destroyed`] or no-ops.
	pub async fn destroy(&self) {
		if self.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		info!("coordinator destroyed");
		let mut state = self.state.lock().await;
		for stream in state.streams.values() {
			stream.destroy().await;
		}
		state.streams.clear();
		state.manifest = None;
	}
}
