// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Exponential retry backoff with jitter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound of the random jitter, as a fraction of the unjittered delay.
pub const JITTER_RATIO: f64 = 0.3;

const DEFAULT_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_MS: u64 = 300_000;

/// Retry delay policy: `min(base * 2^(attempts-1) + jitter, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
	pub base: Duration,
	pub max: Duration,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_millis(DEFAULT_BASE_MS),
			max: Duration::from_millis(DEFAULT_MAX_MS),
		}
	}
}

impl BackoffPolicy {
	pub fn new(base: Duration, max: Duration) -> Self {
		Self { base, max }
	}

	/// Delay before the next attempt after `attempts` claims have failed.
	///
	/// `jitter` is a fraction in `[0, 1)` scaled by [`JITTER_RATIO`]; values
	/// outside that range are clamped. An `attempts` of zero is treated as one.
	pub fn delay(&self, attempts: u32, jitter: f64) -> Duration {
		let exponent = attempts.max(1) - 1;
		let base_ms = self.base.as_millis().min(u64::MAX as u128) as u64;
		let max_ms = self.max.as_millis().min(u64::MAX as u128) as u64;

		let unjittered = 2u64
			.checked_pow(exponent)
			.and_then(|factor| base_ms.checked_mul(factor))
			.unwrap_or(u64::MAX);
		if unjittered >= max_ms {
			return self.max;
		}

		let jitter = if jitter.is_finite() {
			jitter.clamp(0.0, 1.0)
		} else {
			0.0
		};
		let jitter_ms = (unjittered as f64 * JITTER_RATIO * jitter).round() as u64;
		Duration::from_millis(unjittered.saturating_add(jitter_ms).min(max_ms))
	}

	/// [`Self::delay`] with the jitter fraction drawn from `rng`.
	pub fn delay_with_rng(&self, attempts: u32, rng: &mut fastrand::Rng) -> Duration {
		self.delay(attempts, rng.f64())
	}
}
