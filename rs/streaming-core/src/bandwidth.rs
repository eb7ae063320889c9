//! Bandwidth Estimator: an exponentially-weighted throughput estimate
//! derived from observed segment fetches.

use std::sync::atomic::{AtomicU64, Ordering};

/// Exponentially-weighted moving average of observed throughput, in
/// bits/second. A fresh estimator has no opinion until the first sample.
pub struct BandwidthEstimator {
	/// Smoothing factor in `(0, 1)`; higher weighs recent samples more.
	half_life_samples: f64,
	estimate_bits: AtomicU64,
	has_estimate: std::sync::atomic::AtomicBool,
}

impl BandwidthEstimator {
	/// `half_life_samples` controls how many samples it takes for an old
	/// measurement's influence to halve; reacting roughly every segment,
	/// this defaults to 5 segments.
	pub fn new(half_life_samples: f64) -> Self {
		Self {
			half_life_samples,
			estimate_bits: AtomicU64::new(0),
			has_estimate: std::sync::atomic::AtomicBool::new(false),
		}
	}

	/// Record one fetch's observed throughput: `bytes` over `seconds`.
	pub fn sample(&self, bytes: u64, seconds: f64) -> f64 {
		if seconds <= 0.0 {
			return self.estimate();
		}
		let sample_bps = (bytes as f64 * 8.0) / seconds;
		let alpha = 1.0 - 0.5f64.powf(1.0 / self.half_life_samples);

		let updated = if self.has_estimate.swap(true, Ordering::AcqRel) {
			let prev = f64::from_bits(self.estimate_bits.load(Ordering::Acquire));
			prev + alpha * (sample_bps - prev)
		} else {
			sample_bps
		};

		self.estimate_bits.store(updated.to_bits(), Ordering::Release);
		updated
	}

	/// The current estimate in bits/second, or `0.0` if no sample has been
	/// recorded yet.
	pub fn estimate(&self) -> f64 {
		if self.has_estimate.load(Ordering::Acquire) {
			f64::from_bits(self.estimate_bits.load(Ordering::Acquire))
		} else {
			0.0
		}
	}
}

impl Default for BandwidthEstimator {
	fn default() -> Self {
		Self::new(5.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_sample_is_the_estimate() {
		let est = BandwidthEstimator::default();
		let bps = est.sample(1_000_000, 1.0); // 8 Mbps
		assert!((bps - 8_000_000.0).abs() < 1.0);
		assert!((est.estimate() - 8_000_000.0).abs() < 1.0);
	}

	#[test]
	fn converges_toward_sustained_rate() {
		let est = BandwidthEstimator::default();
		est.sample(125_000, 1.0); // 1 Mbps
		for _ in 0..50 {
			est.sample(625_000, 1.0); // 5 Mbps
		}
		assert!(est.estimate() > 4_500_000.0);
	}

	#[test]
	fn no_estimate_before_first_sample() {
		let est = BandwidthEstimator::default();
		assert_eq!(est.estimate(), 0.0);
	}
}
