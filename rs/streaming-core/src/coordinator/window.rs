//! Computes the common play window across a set of selected
//! representations' segment indices: the intersection of their
//! availability, minus a live safety margin or clamped to the period
//! duration for static content.

use crate::segment::SegmentIndex;

/// The seekable range, in seconds, common to every active stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayWindow {
	pub start: f64,
	pub end: f64,
}

/// `None` if any index is empty, or if the intersection is empty/inverted.
pub fn compute_play_window<'a>(
	indices: impl Iterator<Item = &'a SegmentIndex>,
	live: bool,
	min_buffer_time: f64,
	period_duration: Option<f64>,
) -> Option<PlayWindow> {
	let mut start = f64::MIN;
	let mut end = f64::MAX;
	let mut saw_any = false;

	for index in indices {
		saw_any = true;
		let first = index.first()?;
		let last = index.last()?;

		start = start.max(first.start_time);

		// Live: stay `min_buffer_time` behind this index's own edge, per
		// index, so a fetch at the playhead always lands on an
		// already-available segment even when representations don't share
		// a segment duration. Static: the index's own last availability.
		let index_end = if live {
			(last.start_time - min_buffer_time).max(0.0)
		} else {
			last.end_time.unwrap_or(f64::INFINITY)
		};
		end = end.min(index_end);
	}

	if !saw_any {
		return None;
	}

	if !live && end.is_infinite() {
		end = period_duration.unwrap_or(end);
	}

	if end.is_infinite() || end <= start {
		return None;
	}

	Some(PlayWindow { start, end })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::segment::SegmentReference;

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

	#[test]
	fn intersects_multiple_indices() {
		let video = index(&[(0.0, 6.0), (6.0, 60.0)]);
		let audio = index(&[(1.0, 7.0), (7.0, 58.0)]);
		let window = compute_play_window([&video, &audio].into_iter(), false, 4.0, Some(60.0)).unwrap();
		assert_eq!(window.start, 1.0);
		assert_eq!(window.end, 58.0);
	}

	#[test]
	fn live_window_stays_behind_the_edge() {
		let video = index(&[(0.0, 6.0), (6.0, 60.0)]);
		let window = compute_play_window([&video].into_iter(), true, 4.0, None).unwrap();
		// Last ref starts at 6.0; stay 4.0 behind its start, not its end.
		assert_eq!(window.end, 2.0);
	}

	#[test]
	fn live_window_takes_the_tightest_index() {
		let video = index(&[(0.0, 6.0), (6.0, 12.0)]);
		let audio = index(&[(0.0, 4.0), (4.0, 8.0), (8.0, 9.0)]);
		let window = compute_play_window([&video, &audio].into_iter(), true, 1.0, None).unwrap();
		// video: max(0, 6-1)=5.0; audio: max(0, 8-1)=7.0; window takes the min.
		assert_eq!(window.end, 5.0);
	}

	#[test]
	fn empty_index_yields_no_window() {
		let empty = SegmentIndex::new(vec![]);
		assert!(compute_play_window([&empty].into_iter(), false, 4.0, None).is_none());
	}
}
