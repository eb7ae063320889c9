//! Language Matcher: fuzzy BCP-47 matching used by the coordinator to
//! order audio/text sets by preferred language.
//!
//! Kept as free functions rather than methods on the coordinator so they
//! can be unit tested in isolation.

use crate::manifest::StreamSet;

fn subtags(tag: &str) -> Vec<String> {
	tag.split('-').map(|s| s.to_ascii_lowercase()).collect()
}

/// Returns the fuzz level at which `tag` matches `preferred`, lowest wins:
/// `0` exact, `1` primary+region, `2` primary subtag only. `None` if there
/// is no match at any level.
pub fn fuzz_level(tag: &str, preferred: &str) -> Option<u8> {
	let a = subtags(tag);
	let b = subtags(preferred);

	if a == b {
		return Some(0);
	}

	let a_region = &a[0..a.len().min(2)];
	let b_region = &b[0..b.len().min(2)];
	if a_region == b_region {
		return Some(1);
	}

	if a.first().is_some() && a.first() == b.first() {
		return Some(2);
	}

	None
}

/// Reorders `sets` so that the best language match against `preferred`
/// (the lowest fuzz level, first match wins ties deterministically) is
/// first. If nothing matches by language, the `main`-flagged set is
/// promoted instead. Sets with no match and no `main` flag keep their
/// relative order.
pub fn order_by_preference(sets: &mut [StreamSet], preferred: &str) {
	let best = sets
		.iter()
		.enumerate()
		.filter_map(|(i, s)| s.lang.as_deref().and_then(|lang| fuzz_level(lang, preferred)).map(|lvl| (i, lvl)))
		.min_by_key(|(_, lvl)| *lvl)
		.map(|(i, _)| i);

	let promote = best.or_else(|| sets.iter().position(|s| s.main));

	if let Some(i) = promote {
		sets[0..=i].rotate_right(1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manifest::ContentType;

	fn set(id: u64, lang: Option<&str>, main: bool) -> StreamSet {
		StreamSet {
			unique_id: id,
			content_type: ContentType::Audio,
			lang: lang.map(String::from),
			main,
			drm_schemes: vec![],
			streams: vec![],
		}
	}

	#[test]
	fn exact_match_wins() {
		assert_eq!(fuzz_level("fr-CA", "fr-CA"), Some(0));
	}

	#[test]
	fn region_match_beats_primary_only() {
		assert_eq!(fuzz_level("en-US", "en-US"), Some(0));
		assert_eq!(fuzz_level("en-GB", "en-US"), Some(2));
	}

	#[test]
	fn primary_subtag_matches_ignoring_region() {
		assert_eq!(fuzz_level("fr", "fr-CA"), Some(2));
	}

	#[test]
	fn no_match_across_primary() {
		assert_eq!(fuzz_level("de", "fr-CA"), None);
	}

	#[test]
	fn s2_language_preference_promotes_best_match() {
		let mut sets = vec![set(1, Some("en"), false), set(2, Some("fr"), false), set(3, Some("de"), false)];
		order_by_preference(&mut sets, "fr-CA");
		assert_eq!(sets[0].unique_id, 2);
	}

	#[test]
	fn falls_back_to_main_when_nothing_matches() {
		let mut sets = vec![set(1, Some("en"), false), set(2, Some("de"), true)];
		order_by_preference(&mut sets, "ja");
		assert_eq!(sets[0].unique_id, 2);
	}
}
