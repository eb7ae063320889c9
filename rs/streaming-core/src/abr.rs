//! Adaptive bitrate manager: picks an initial and an ongoing video
//! representation given the current bandwidth estimate and restrictions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::manifest::{StreamInfo, StreamSet};

const UPSWITCH_FACTOR: f64 = 1.15;
const UPSWITCH_SUSTAIN_SECONDS: f64 = 5.0;
const DOWNSWITCH_FACTOR: f64 = 0.8;

struct PendingUpswitch {
	candidate_id: u64,
	since_seconds: f64,
}

/// Adaptive bitrate policy: highest bitrate at or under 80% of the
/// bandwidth estimate initially; afterwards, upswitch only on a 5s
/// sustained 1.15x margin, downswitch immediately on a 0.8x drop.
pub struct AbrManager {
	enabled: AtomicBool,
	pending: Mutex<Option<PendingUpswitch>>,
}

impl AbrManager {
	pub fn new() -> Self {
		Self {
			enabled: AtomicBool::new(true),
			pending: Mutex::new(None),
		}
	}

	pub fn enable(&self, enabled: bool) {
		self.enabled.store(enabled, Ordering::Release);
		if !enabled {
			*self.pending.lock().unwrap() = None;
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::Acquire)
	}

	/// Picks a starting representation: highest bitrate `<= estimate * 0.8`,
	/// falling back to the lowest bitrate if none qualify.
	pub fn initial_video_id(&self, set: &StreamSet, bandwidth_estimate: f64) -> u64 {
		let target = bandwidth_estimate * DOWNSWITCH_FACTOR;
		best_at_or_below(set, target)
			.or_else(|| lowest(set))
			.map(|s| s.unique_id)
			.unwrap_or(0)
	}

	/// Decides whether to switch away from `current_id`. Returns `current_id`
	/// unchanged when ABR is disabled, when `current_id` is not found, or
	/// when hysteresis has not yet been satisfied.
	pub fn choose(&self, set: &StreamSet, estimate: f64, current_id: u64, now_seconds: f64) -> u64 {
		if !self.is_enabled() {
			return current_id;
		}

		let Some(current) = set.streams.iter().find(|s| s.unique_id == current_id) else {
			return current_id;
		};

		// Downswitch: immediate, no hysteresis.
		if estimate < current.bandwidth as f64 * DOWNSWITCH_FACTOR {
			*self.pending.lock().unwrap() = None;
			return best_at_or_below(set, estimate)
				.map(|s| s.unique_id)
				.unwrap_or(current_id);
		}

		// Upswitch candidate: the highest-bitrate enabled rep above current
		// whose bitrate the estimate clears by the upswitch margin.
		let candidate = set
			.streams
			.iter()
			.filter(|s| s.enabled && s.bandwidth > current.bandwidth && estimate >= s.bandwidth as f64 * UPSWITCH_FACTOR)
			.max_by_key(|s| s.bandwidth);

		let mut pending = self.pending.lock().unwrap();
		match candidate {
			None => {
				*pending = None;
				current_id
			}
			Some(c) => match pending.as_ref() {
				Some(p) if p.candidate_id == c.unique_id => {
					if now_seconds - p.since_seconds >= UPSWITCH_SUSTAIN_SECONDS {
						*pending = None;
						c.unique_id
					} else {
						current_id
					}
				}
				_ => {
					*pending = Some(PendingUpswitch {
						candidate_id: c.unique_id,
						since_seconds: now_seconds,
					});
					current_id
				}
			},
		}
	}
}

impl Default for AbrManager {
	fn default() -> Self {
		Self::new()
	}
}

fn best_at_or_below(set: &StreamSet, target: f64) -> Option<&StreamInfo> {
	set.streams
		.iter()
		.filter(|s| s.enabled && (s.bandwidth as f64) <= target)
		.max_by_key(|s| s.bandwidth)
}

fn lowest(set: &StreamSet) -> Option<&StreamInfo> {
	set.streams.iter().filter(|s| s.enabled).min_by_key(|s| s.bandwidth)
}
