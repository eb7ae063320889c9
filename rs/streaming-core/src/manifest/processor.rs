//! Manifest Processor: normalises a raw parsed manifest into one the
//! rest of the core can select from.

use std::collections::HashMap;

use crate::error::{Error, Result};

use super::{ContentType, Manifest, StreamSet};

/// Predicate the media sink supplies: can it accept this MIME type at all?
pub type TypeSupport<'a> = &'a dyn Fn(&str) -> bool;

/// Normalises a raw manifest:
/// 1. Assigns dense, manifest-scoped `unique_id`s to every stream set and
///    stream info.
/// 2. Drops stream infos the sink's type-support predicate rejects.
/// 3. Drops stream sets left empty by (2).
/// 4. Computes, per period and content type, the maximal compatibility
///    group sharing a basic MIME type with a chosen reference set (one set
///    for video, all MIME-compatible sets for audio, all sets for text).
pub struct ManifestProcessor;

impl ManifestProcessor {
	/// Processes `manifest` in place, returning [`Error::ManifestEmpty`] if
	/// no period has any playable stream set once filtering is done.
	pub fn process(manifest: &mut Manifest, supports: TypeSupport<'_>) -> Result<()> {
		let mut next_id = 0u64;

		for period in &mut manifest.periods {
			for set in &mut period.stream_sets {
				set.unique_id = next_id;
				next_id += 1;
				for info in &mut set.streams {
					info.unique_id = next_id;
					next_id += 1;
				}
			}

			// (2) drop unsupported stream infos.
			for set in &mut period.stream_sets {
				set.streams.retain(|info| supports(&info.full_mime_type));
			}

			// (3) drop stream sets left empty.
			period.stream_sets.retain(|set| !set.streams.is_empty());

			// (4) compute compatibility groups per content type, dropping
			// sets that fall outside the chosen group.
			period.stream_sets = compatibility_filter(std::mem::take(&mut period.stream_sets));
		}

		manifest.periods.retain(|period| !period.stream_sets.is_empty());

		if manifest.periods.is_empty() {
			return Err(Error::ManifestEmpty);
		}

		Ok(())
	}
}

/// Groups `sets` by content type, then keeps only the maximal
/// MIME-compatible group within each.
fn compatibility_filter(sets: Vec<StreamSet>) -> Vec<StreamSet> {
	let mut by_type: HashMap<ContentType, Vec<StreamSet>> = HashMap::new();
	for set in sets {
		by_type.entry(set.content_type).or_default().push(set);
	}

	let mut result = Vec::new();

	for (content_type, mut group) in by_type {
		if group.is_empty() {
			continue;
		}

		match content_type {
			ContentType::Video => {
				// Exactly one stream set: the first, plus every other set
				// that shares its basic MIME type (then keep only that
				// single reference set; video never has alternates at the
				// manifest level, only representations).
				if let Some(reference) = group.first().and_then(|s| s.basic_mime_type()).map(String::from) {
					group.retain(|s| s.basic_mime_type() == Some(reference.as_str()));
				}
				if let Some(first) = group.into_iter().next() {
					result.push(first);
				}
			}
			ContentType::Audio => {
				// All sets sharing the basic MIME type of the first set.
				if let Some(reference) = group.first().and_then(|s| s.basic_mime_type()).map(String::from) {
					group.retain(|s| s.basic_mime_type() == Some(reference.as_str()));
				}
				result.extend(group);
			}
			ContentType::Text => {
				// All sets, regardless of MIME compatibility.
				result.extend(group);
			}
		}
	}

	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manifest::{ManifestKind, Period, StreamInfo};

	fn info(id: u64, mime: &str, bandwidth: u64) -> StreamInfo {
		StreamInfo {
			unique_id: id,
			full_mime_type: mime.into(),
			bandwidth,
			width: Some(1280),
			height: Some(720),
			timestamp_offset: 0.0,
			segment_index_source: None,
			init_segment_url: None,
			enabled: true,
		}
	}

	fn set(content_type: ContentType, streams: Vec<StreamInfo>) -> StreamSet {
		StreamSet {
			unique_id: 0,
			content_type,
			lang: None,
			main: false,
			drm_schemes: vec![],
			streams,
		}
	}

	fn manifest(periods: Vec<Period>) -> Manifest {
		Manifest {
			kind: ManifestKind::Static,
			min_buffer_time: 4.0,
			update_url: None,
			update_period: None,
			periods,
		}
	}

	#[test]
	fn drops_unsupported_mime_types() {
		let mut m = manifest(vec![Period {
			start: 0.0,
			duration: Some(60.0),
			stream_sets: vec![set(
				ContentType::Video,
				vec![info(0, "video/mp4; codecs=\"avc1\"", 1_000_000), info(0, "video/webm", 500_000)],
			)],
		}]);

		ManifestProcessor::process(&mut m, &|mime| mime.starts_with("video/mp4")).unwrap();

		assert_eq!(m.periods[0].stream_sets[0].streams.len(), 1);
	}

	#[test]
	fn fails_when_nothing_playable() {
		let mut m = manifest(vec![Period {
			start: 0.0,
			duration: Some(60.0),
			stream_sets: vec![set(ContentType::Video, vec![info(0, "video/webm", 500_000)])],
		}]);

		let result = ManifestProcessor::process(&mut m, &|_| false);
		assert!(matches!(result, Err(Error::ManifestEmpty)));
	}

	#[test]
	fn video_compatibility_group_keeps_one_set() {
		let mut m = manifest(vec![Period {
			start: 0.0,
			duration: Some(60.0),
			stream_sets: vec![
				set(ContentType::Video, vec![info(0, "video/mp4; codecs=\"avc1\"", 1_000_000)]),
				set(ContentType::Video, vec![info(0, "video/mp4; codecs=\"hev1\"", 2_000_000)]),
			],
		}]);

		ManifestProcessor::process(&mut m, &|_| true).unwrap();

		assert_eq!(m.periods[0].stream_sets.iter().filter(|s| s.content_type == ContentType::Video).count(), 1);
	}

	#[test]
	fn unique_ids_are_dense_and_stable_within_a_run() {
		let mut m = manifest(vec![Period {
			start: 0.0,
			duration: Some(60.0),
			stream_sets: vec![set(
				ContentType::Audio,
				vec![info(0, "audio/mp4", 128_000), info(0, "audio/mp4", 64_000)],
			)],
		}]);

		ManifestProcessor::process(&mut m, &|_| true).unwrap();

		let ids: Vec<u64> = m.periods[0].stream_sets[0].streams.iter().map(|s| s.unique_id).collect();
		assert_ne!(ids[0], ids[1]);
	}
}
