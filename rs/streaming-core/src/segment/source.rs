//! Segment Index Source: lazily constructs and caches a [`SegmentIndex`]
//! from a manifest entry.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::Result;

use super::{SegmentIndex, SegmentReference};

/// One entry of a `SegmentTimeline`-style source: `repeat + 1` segments of
/// `duration`, starting at `start_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
	pub start_time: f64,
	pub duration: f64,
	pub repeat: u32,
}

/// The three ways a manifest can describe how to find a representation's
/// segments. Tagged union, no inheritance; this is the wire shape a
/// manifest parser hands in directly as `StreamInfo.segment_index_source`,
/// so it derives the same `serde` round-trip as the rest of the manifest
/// model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SegmentIndexSourceKind {
	/// References provided directly by the manifest.
	ExplicitList { refs: Vec<SegmentReference> },

	/// A URL template plus a fixed segment duration; the number of segments
	/// is derived from the period duration at parse time.
	TemplateDuration {
		url_template: String,
		segment_duration: f64,
		timescale: u64,
		period_duration: f64,
	},

	/// A URL template plus an explicit timeline (or, for `dynamic`
	/// manifests, a timeline that is re-evaluated against the wall clock as
	/// it advances).
	TemplateTimeline {
		url_template: String,
		entries: Vec<TimelineEntry>,
		dynamic: bool,
		/// Wall-clock time (seconds) at which the timeline's `start_time`
		/// origin corresponds to `t=0`; only meaningful when `dynamic`.
		availability_start: f64,
	},
}

/// Lazily constructs and caches a [`SegmentIndex`] from one manifest entry.
///
/// `create()` is idempotent: the first call builds the index, every
/// subsequent call returns a clone of the cached result. Static sources
/// freeze their index forever; dynamic sources re-derive the timeline
/// against the wall clock every time a caller asks for a fresh snapshot via
/// [`SegmentIndexSource::refresh`].
#[derive(Clone)]
pub struct SegmentIndexSource {
	kind: Arc<SegmentIndexSourceKind>,
	cached: Arc<Mutex<Option<SegmentIndex>>>,
}

impl std::fmt::Debug for SegmentIndexSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SegmentIndexSource").field("kind", &self.kind).finish()
	}
}

/// Serializes as its `SegmentIndexSourceKind` alone; the lazily-built cache
/// is transient runtime state, never part of the wire manifest.
impl Serialize for SegmentIndexSource {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		self.kind.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for SegmentIndexSource {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(SegmentIndexSource::new(SegmentIndexSourceKind::deserialize(deserializer)?))
	}
}

impl SegmentIndexSource {
	pub fn new(kind: SegmentIndexSourceKind) -> Self {
		Self {
			kind: Arc::new(kind),
			cached: Arc::new(Mutex::new(None)),
		}
	}

	pub fn is_dynamic(&self) -> bool {
		matches!(
			&*self.kind,
			SegmentIndexSourceKind::TemplateTimeline { dynamic: true, .. }
		)
	}

	/// Produces the cached [`SegmentIndex`], building it on first use.
	pub async fn create(&self, clock: &dyn Clock) -> Result<SegmentIndex> {
		let mut guard = self.cached.lock().unwrap();
		if let Some(index) = guard.as_ref() {
			return Ok(index.clone());
		}
		let index = build_index(&self.kind, clock);
		*guard = Some(index.clone());
		Ok(index)
	}

	/// Re-derives the index against the current wall clock (dynamic
	/// sources only) and updates the cache in place. Static sources are a
	/// no-op, returning the already-frozen index.
	pub async fn refresh(&self, clock: &dyn Clock) -> Result<SegmentIndex> {
		if !self.is_dynamic() {
			return self.create(clock).await;
		}
		let index = build_index(&self.kind, clock);
		let mut guard = self.cached.lock().unwrap();
		*guard = Some(index.clone());
		Ok(index)
	}
}

fn build_index(kind: &SegmentIndexSourceKind, clock: &dyn Clock) -> SegmentIndex {
	match kind {
		SegmentIndexSourceKind::ExplicitList { refs } => SegmentIndex::new(refs.clone()),
		SegmentIndexSourceKind::TemplateDuration {
			url_template,
			segment_duration,
			timescale,
			period_duration,
		} => {
			let seg_seconds = (*segment_duration / *timescale as f64).max(f64::MIN_POSITIVE);
			let count = (*period_duration / seg_seconds).ceil() as u64;
			let refs = (0..count)
				.map(|i| {
					let start = i as f64 * seg_seconds;
					let end = ((i + 1) as f64 * seg_seconds).min(*period_duration);
					SegmentReference {
						index: i,
						start_time: start,
						end_time: Some(end),
						url: url_template.replace("{index}", &i.to_string()),
						byte_range: None,
					}
				})
				.collect();
			SegmentIndex::new(refs)
		}
		SegmentIndexSourceKind::TemplateTimeline {
			url_template,
			entries,
			dynamic,
			availability_start,
		} => {
			let mut refs = Vec::new();
			let mut index = 0u64;
			for entry in entries {
				for rep in 0..=entry.repeat {
					let start = entry.start_time + rep as f64 * entry.duration;
					let end = start + entry.duration;
					if *dynamic {
						// Only emit segments that have actually become available.
						let available_at = availability_start + end;
						if available_at > clock.wall_clock_seconds() {
							continue;
						}
					}
					refs.push(SegmentReference {
						index,
						start_time: start,
						end_time: Some(end),
						url: url_template.replace("{index}", &index.to_string()),
						byte_range: None,
					});
					index += 1;
				}
			}
			SegmentIndex::new(refs)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::tests::FixedClock;

	#[tokio::test]
	async fn explicit_list_is_used_verbatim() {
		let refs = vec![SegmentReference {
			index: 0,
			start_time: 0.0,
			end_time: Some(6.0),
			url: "seg0.mp4".into(),
			byte_range: None,
		}];
		let source = SegmentIndexSource::new(SegmentIndexSourceKind::ExplicitList { refs: refs.clone() });
		let clock = FixedClock::default();
		let index = source.create(&clock).await.unwrap();
		assert_eq!(index.length(), 1);
	}

	#[tokio::test]
	async fn template_duration_generates_ceil_count() {
		let source = SegmentIndexSource::new(SegmentIndexSourceKind::TemplateDuration {
			url_template: "seg{index}.mp4".into(),
			segment_duration: 6.0,
			timescale: 1,
			period_duration: 60.0,
		});
		let clock = FixedClock::default();
		let index = source.create(&clock).await.unwrap();
		assert_eq!(index.length(), 10);
		assert_eq!(index.last().unwrap().end_time, Some(60.0));
	}

	#[tokio::test]
	async fn create_is_idempotent() {
		let source = SegmentIndexSource::new(SegmentIndexSourceKind::TemplateDuration {
			url_template: "seg{index}.mp4".into(),
			segment_duration: 6.0,
			timescale: 1,
			period_duration: 60.0,
		});
		let clock = FixedClock::default();
		let first = source.create(&clock).await.unwrap();
		let second = source.create(&clock).await.unwrap();
		assert_eq!(first.length(), second.length());
	}

	#[tokio::test]
	async fn dynamic_timeline_only_exposes_available_segments() {
		let source = SegmentIndexSource::new(SegmentIndexSourceKind::TemplateTimeline {
			url_template: "seg{index}.mp4".into(),
			entries: vec![TimelineEntry {
				start_time: 0.0,
				duration: 6.0,
				repeat: 9,
			}],
			dynamic: true,
			availability_start: 0.0,
		});
		let clock = FixedClock::new(20.0);
		let index = source.refresh(&clock).await.unwrap();
		// Only segments whose end_time <= 20.0 have become available: 0-6,6-12,12-18.
		assert_eq!(index.length(), 3);
	}
}
