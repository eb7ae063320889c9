//! Segment indices and their lazy sources.

mod index;
mod source;

pub use index::SegmentIndex;
pub use source::{SegmentIndexSource, SegmentIndexSourceKind};

use serde::{Deserialize, Serialize};

/// A single fetchable media segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentReference {
	/// Monotonic per-stream index.
	pub index: u64,
	pub start_time: f64,
	/// `None` only for the trailing reference of a live stream.
	pub end_time: Option<f64>,
	pub url: String,
	#[serde(default)]
	pub byte_range: Option<(u64, u64)>,
}

impl SegmentReference {
	pub fn contains(&self, t: f64) -> bool {
		match self.end_time {
			Some(end) => t >= self.start_time && t < end,
			None => t >= self.start_time,
		}
	}

	pub fn shift(&mut self, delta: f64) {
		self.start_time += delta;
		if let Some(end) = self.end_time.as_mut() {
			*end += delta;
		}
	}
}
