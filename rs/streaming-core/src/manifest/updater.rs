//! Manifest Updater: merges a freshly fetched manifest into the live one
//! for `dynamic` (live) manifests, returning the set of representations
//! that disappeared.

use crate::error::{Error, Result};

use super::{ContentType, Manifest, ManifestKind, Period, StreamInfo, StreamSet};

/// The outcome of merging a refetched manifest into the live one.
pub struct ManifestUpdate {
	/// Stream infos present in the old manifest but absent from the new
	/// one; the coordinator destroys these after switching any Stream that
	/// was using one.
	pub removed: Vec<StreamInfo>,
}

/// Merges `old` and a freshly parsed `new` manifest. `new` is
/// mutated in place so that stream sets/infos that match something in
/// `old` keep the old, stable `unique_id` — everything downstream (Streams,
/// track selections) is keyed by that id and must not see it change purely
/// because the manifest was refetched.
pub struct ManifestUpdater;

impl ManifestUpdater {
	pub fn merge(old: &Manifest, new: &mut Manifest) -> Result<ManifestUpdate> {
		if old.kind != ManifestKind::Dynamic || new.kind != ManifestKind::Dynamic {
			return Err(Error::ManifestIncompatible {
				reason: "manifest updates only apply to dynamic manifests".into(),
			});
		}

		let mut removed = Vec::new();

		for new_period in &mut new.periods {
			match old.periods.iter().find(|p| periods_align(p, new_period)) {
				Some(old_period) => removed.extend(merge_period(old_period, new_period)),
				None => {
					// A brand new period; nothing to remove, nothing to carry over.
				}
			}
		}

		for old_period in &old.periods {
			if !new.periods.iter().any(|p| periods_align(old_period, p)) {
				for set in &old_period.stream_sets {
					removed.extend(set.streams.iter().cloned());
				}
			}
		}

		Ok(ManifestUpdate { removed })
	}
}

fn periods_align(a: &Period, b: &Period) -> bool {
	(a.start - b.start).abs() < 1e-6
}

fn merge_period(old: &Period, new: &mut Period) -> Vec<StreamInfo> {
	let mut removed = Vec::new();

	for new_set in &mut new.stream_sets {
		if let Some(old_set) = match_stream_set(old, new_set) {
			new_set.unique_id = old_set.unique_id;
			removed.extend(merge_stream_set(old_set, new_set));
		}
	}

	for old_set in &old.stream_sets {
		let still_present = new.stream_sets.iter().any(|s| s.unique_id == old_set.unique_id);
		if !still_present {
			removed.extend(old_set.streams.iter().cloned());
		}
	}

	removed
}

fn match_stream_set<'a>(old: &'a Period, new_set: &StreamSet) -> Option<&'a StreamSet> {
	old.stream_sets
		.iter()
		.find(|s| s.unique_id == new_set.unique_id)
		.or_else(|| old.stream_sets.iter().find(|s| signature(s) == signature(new_set)))
}

fn signature(set: &StreamSet) -> (ContentType, Option<String>, usize, Option<String>) {
	(
		set.content_type,
		set.lang.clone(),
		set.drm_schemes.len(),
		set.basic_mime_type().map(String::from),
	)
}

fn merge_stream_set(old_set: &StreamSet, new_set: &mut StreamSet) -> Vec<StreamInfo> {
	let mut removed = Vec::new();

	for new_info in &mut new_set.streams {
		if let Some(old_info) = match_stream_info(old_set, new_info) {
			new_info.unique_id = old_info.unique_id;
			new_info.enabled = old_info.enabled;
		}
	}

	for old_info in &old_set.streams {
		let still_present = new_set.streams.iter().any(|i| i.unique_id == old_info.unique_id);
		if !still_present {
			removed.push(old_info.clone());
		}
	}

	removed
}

fn match_stream_info<'a>(old_set: &'a StreamSet, new_info: &StreamInfo) -> Option<&'a StreamInfo> {
	old_set
		.streams
		.iter()
		.find(|i| i.unique_id == new_info.unique_id)
		.or_else(|| {
			old_set
				.streams
				.iter()
				.find(|i| i.full_mime_type == new_info.full_mime_type && i.bandwidth == new_info.bandwidth)
		})
}
