//! Segment Index: an ordered, mutable sequence of [`SegmentReference`]s for
//! one representation.

use super::SegmentReference;

/// Ordered, mutable sequence of segment references for one representation.
///
/// Invariants:
/// 1. References are sorted by `start_time`, strictly non-decreasing.
/// 2. Adjacent references may touch but not overlap.
/// 3. For live, references may be appended at the tail and evicted from the
///    head; the sequence never becomes non-contiguous.
/// 4. After [`SegmentIndex::correct`], every reference shifts by exactly `δ`.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
	refs: Vec<SegmentReference>,
	corrected: bool,
}

impl SegmentIndex {
	pub fn new(refs: Vec<SegmentReference>) -> Self {
		debug_assert!(
			refs.windows(2).all(|w| w[0].start_time <= w[1].start_time),
			"segment references must arrive sorted by start_time"
		);
		Self { refs, corrected: false }
	}

	pub fn is_empty(&self) -> bool {
		self.refs.is_empty()
	}

	pub fn length(&self) -> usize {
		self.refs.len()
	}

	pub fn first(&self) -> Option<&SegmentReference> {
		self.refs.first()
	}

	pub fn last(&self) -> Option<&SegmentReference> {
		self.refs.last()
	}

	pub fn all(&self) -> &[SegmentReference] {
		&self.refs
	}

	/// Returns the reference containing `t`, or the nearest following
	/// reference if `t` falls in a gap. `None` if `t` is beyond the tail or
	/// the index is empty.
	pub fn find(&self, t: f64) -> Option<&SegmentReference> {
		if self.refs.is_empty() {
			return None;
		}

		// Binary search on start_time; refs are sorted, so partition_point
		// finds the first reference whose start is > t.
		let idx = self.refs.partition_point(|r| r.start_time <= t);

		if idx == 0 {
			return self.refs.first();
		}

		let candidate = &self.refs[idx - 1];
		if candidate.contains(t) {
			return Some(candidate);
		}

		// t fell in a gap after candidate; return the next reference, if any.
		self.refs.get(idx)
	}

	/// Shifts every reference by `delta` seconds. Callers must apply this
	/// exactly once per index; idempotent only for `delta == 0`.
	pub fn correct(&mut self, delta: f64) {
		if delta == 0.0 {
			return;
		}
		debug_assert!(!self.corrected, "correct() must be applied exactly once per index");
		for r in &mut self.refs {
			r.shift(delta);
		}
		self.corrected = true;
	}

	/// Replaces the tail of this index with `other`, starting at the first
	/// position where `other`'s `start_time` is `<=` the existing one. Used
	/// by live manifest updates to merge freshly parsed segment timelines.
	pub fn merge(&mut self, other: SegmentIndex) {
		if other.refs.is_empty() {
			return;
		}
		let other_first_start = other.refs[0].start_time;
		let split = self.refs.partition_point(|r| r.start_time < other_first_start);
		self.refs.truncate(split);
		self.refs.extend(other.refs);
	}

	/// Appends a single reference at the tail (live growth).
	pub fn append(&mut self, reference: SegmentReference) {
		debug_assert!(
			self.refs.last().is_none_or(|last| last.start_time <= reference.start_time),
			"appended reference must not precede the current tail"
		);
		self.refs.push(reference);
	}

	/// Removes references whose `end_time <= threshold`. References with no
	/// `end_time` (the live trailing reference) are never evicted.
	pub fn evict(&mut self, threshold: f64) {
		self.refs.retain(|r| match r.end_time {
			Some(end) => end > threshold,
			None => true,
		});
	}
}
