// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Millisecond timestamps.
//!
//! Job stores persist timestamps as Unix milliseconds. Every timestamp placed
//! on a [`crate::JobRecord`] is truncated to that resolution first so a record
//! read back from storage compares equal to the one returned by the write.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Current time truncated to whole milliseconds.
pub fn now_millis() -> DateTime<Utc> {
	truncate_millis(Utc::now())
}

pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
	from_millis(to_millis(at)).unwrap_or(at)
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
	at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
	Utc.timestamp_millis_opt(ms).single()
}

/// `at + delay`, saturating at the maximum representable timestamp.
pub fn add_duration(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
	let delta = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
	at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - delay`, saturating at the minimum representable timestamp.
pub fn sub_duration(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
	let delta = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
	at.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
