//! The manifest data model.
//!
//! This is the structured form a manifest parser (XML/JSON, out of scope
//! here) is expected to hand to the coordinator: a plain, serde-friendly
//! record of "the set of things a player could choose to play", with no
//! inheritance, one rendition list per content type.

mod processor;
mod updater;

pub use processor::ManifestProcessor;
pub use updater::{ManifestUpdate, ManifestUpdater};

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::collections::BTreeMap;

use crate::segment::SegmentIndexSource;

/// `kind` of a [`Manifest`]: static (VOD, fixed duration) or dynamic (live,
/// periodically refetched).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
	Static,
	Dynamic,
}

/// The content type of a [`StreamSet`] / [`StreamInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
	Video,
	Audio,
	Text,
}

impl ContentType {
	pub const ALL: [ContentType; 3] = [ContentType::Video, ContentType::Audio, ContentType::Text];
}

/// An opaque DRM descriptor. The core never interprets `data` (a PSSH-style
/// key-system payload, hex-encoded on the wire); it is only compared for set
/// membership when deciding compatibility groups.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DrmScheme {
	pub system_id: String,
	#[serde_as(as = "Option<Hex>")]
	#[serde(default)]
	pub data: Option<Vec<u8>>,
}

/// Root of a parsed manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
	pub kind: ManifestKind,
	pub min_buffer_time: f64,
	#[serde(default)]
	pub update_url: Option<String>,
	#[serde(default)]
	pub update_period: Option<f64>,
	pub periods: Vec<Period>,
}

impl Manifest {
	/// Invariant check used by the updater: `update_period` is only
	/// meaningful for dynamic manifests, and must be positive when present.
	pub fn is_live(&self) -> bool {
		self.kind == ManifestKind::Dynamic
	}
}

/// One `Period` of a [`Manifest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
	pub start: f64,
	#[serde(default)]
	pub duration: Option<f64>,
	pub stream_sets: Vec<StreamSet>,
}

/// An adaptation set: a group of interchangeable [`StreamInfo`]s for one
/// content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSet {
	pub unique_id: u64,
	pub content_type: ContentType,
	#[serde(default)]
	pub lang: Option<String>,
	#[serde(default)]
	pub main: bool,
	#[serde(default)]
	pub drm_schemes: Vec<DrmScheme>,
	pub streams: Vec<StreamInfo>,
}

impl StreamSet {
	/// The basic MIME type (container + top-level codec family) shared by
	/// every stream in this set, if any streams remain.
	pub fn basic_mime_type(&self) -> Option<&str> {
		self.streams.first().map(|s| basic_mime_type(&s.full_mime_type))
	}
}

/// One representation within a [`StreamSet`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
	pub unique_id: u64,
	pub full_mime_type: String,
	pub bandwidth: u64,
	#[serde(default)]
	pub width: Option<u32>,
	#[serde(default)]
	pub height: Option<u32>,
	#[serde(default)]
	pub timestamp_offset: f64,
	/// How to find this representation's segments; the wire manifest
	/// carries the tagged [`SegmentIndexSourceKind`] directly, and this
	/// builds/caches the actual [`SegmentIndex`] lazily on first use.
	#[serde(default, rename = "segments")]
	pub segment_index_source: Option<SegmentIndexSource>,
	/// URL of this representation's initialisation segment, if the
	/// container needs one fetched and appended before the first media
	/// segment.
	#[serde(default)]
	pub init_segment_url: Option<String>,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
}

fn default_enabled() -> bool {
	true
}

impl StreamInfo {
	pub fn basic_mime_type(&self) -> &str {
		basic_mime_type(&self.full_mime_type)
	}
}

/// Extracts "container/codec-family" from a full MIME type such as
/// `video/mp4; codecs="avc1.64001f"`, ignoring codec profile/level.
pub fn basic_mime_type(full_mime_type: &str) -> &str {
	full_mime_type.split(';').next().unwrap_or(full_mime_type).trim()
}

/// Restrictions applied by the coordinator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restrictions {
	pub max_width: Option<u32>,
	pub max_height: Option<u32>,
	pub max_bandwidth: Option<u64>,
	pub min_bandwidth: Option<u64>,
}

impl Restrictions {
	/// Whether `info` is allowed to play under these restrictions.
	pub fn allows(&self, info: &StreamInfo) -> bool {
		if let (Some(max_w), Some(w)) = (self.max_width, info.width) {
			if w > max_w {
				return false;
			}
		}
		if let (Some(max_h), Some(h)) = (self.max_height, info.height) {
			if h > max_h {
				return false;
			}
		}
		if let Some(max_bw) = self.max_bandwidth {
			if info.bandwidth > max_bw {
				return false;
			}
		}
		if let Some(min_bw) = self.min_bandwidth {
			if info.bandwidth < min_bw {
				return false;
			}
		}
		true
	}
}

/// A convenience grouping used by the coordinator once selection has run:
/// eligible stream sets per content type, in preference order.
pub type StreamSetsByType = BTreeMap<ContentType, Vec<StreamSet>>;
