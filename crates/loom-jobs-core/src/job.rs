// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job record types for the durable job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{JobsError, Result};
use crate::time::{add_duration, truncate_millis};

pub const DEFAULT_PRIORITY: u32 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for JobId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Scheduling state of a job.
///
/// `Failed` is transient: the store never writes it, a failed attempt goes
/// straight back to `Pending` or on to `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Pending,
	Running,
	Completed,
	Failed,
	Dead,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Pending => "pending",
			JobStatus::Running => "running",
			JobStatus::Completed => "completed",
			JobStatus::Failed => "failed",
			JobStatus::Dead => "dead",
		}
	}

	/// Terminal jobs are eligible for pruning and are never claimed again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, JobStatus::Completed | JobStatus::Dead)
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for JobStatus {
	type Err = JobsError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"pending" => Ok(JobStatus::Pending),
			"running" => Ok(JobStatus::Running),
			"completed" => Ok(JobStatus::Completed),
			"failed" => Ok(JobStatus::Failed),
			"dead" => Ok(JobStatus::Dead),
			_ => Err(JobsError::UnknownStatus(s.to_string())),
		}
	}
}

/// A persisted unit of work and its scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
	pub id: JobId,
	/// Routing key into the scheduler's handler table.
	#[serde(rename = "type")]
	pub job_type: String,
	/// Opaque to the queue.
	pub payload: serde_json::Value,
	/// Lower runs first.
	pub priority: u32,
	pub status: JobStatus,
	/// Claims so far, including the one currently running.
	pub attempts: u32,
	pub max_attempts: u32,
	/// Not claimable before this instant. Also carries retry backoff.
	pub run_after: DateTime<Utc>,
	pub last_error: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	/// Set when the job completes or is dead-lettered.
	pub completed_at: Option<DateTime<Utc>>,
	/// Owner tag for attribution, opaque to the queue.
	pub agent_id: Option<String>,
}

impl JobRecord {
	/// Validate an enqueue request and build the new pending record.
	pub fn from_enqueue(input: EnqueueJob, now: DateTime<Utc>) -> Result<Self> {
		let job_type = input.job_type.trim();
		if job_type.is_empty() {
			return Err(JobsError::InvalidJobType);
		}

		let max_attempts = input.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
		if max_attempts == 0 {
			return Err(JobsError::InvalidMaxAttempts(max_attempts));
		}

		let now = truncate_millis(now);
		Ok(Self {
			id: JobId::new(),
			job_type: job_type.to_string(),
			payload: input.payload,
			priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
			status: JobStatus::Pending,
			attempts: 0,
			max_attempts,
			run_after: input.run_after.map(truncate_millis).unwrap_or(now),
			last_error: None,
			created_at: now,
			updated_at: now,
			completed_at: None,
			agent_id: input.agent_id,
		})
	}

	/// Whether the job may be claimed at `now`.
	pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
		self.status == JobStatus::Pending && self.run_after <= now
	}

	/// Whether another failure would exhaust the attempt budget.
	pub fn attempts_exhausted(&self) -> bool {
		self.attempts >= self.max_attempts
	}

	/// `pending -> running`, counting the attempt.
	pub fn mark_running(&mut self, now: DateTime<Utc>) {
		self.status = JobStatus::Running;
		self.attempts = self.attempts.saturating_add(1);
		self.updated_at = truncate_millis(now);
	}

	pub fn mark_completed(&mut self, now: DateTime<Utc>) {
		let now = truncate_millis(now);
		self.status = JobStatus::Completed;
		self.completed_at = Some(now);
		self.updated_at = now;
	}

	/// Record a failed attempt: dead-letter once the attempt budget is spent,
	/// otherwise back to `pending` after `backoff`.
	///
	/// `run_after` never moves backwards.
	pub fn mark_failed(&mut self, error: &str, backoff: Duration, now: DateTime<Utc>) {
		let now = truncate_millis(now);
		self.last_error = Some(error.to_string());
		self.updated_at = now;

		if self.attempts_exhausted() {
			self.status = JobStatus::Dead;
			self.completed_at = Some(now);
		} else {
			self.status = JobStatus::Pending;
			self.run_after = self.run_after.max(truncate_millis(add_duration(now, backoff)));
		}
	}

	/// `running -> pending` after a crash. The lost attempt stays counted.
	pub fn reset_to_pending(&mut self, now: DateTime<Utc>) {
		self.status = JobStatus::Pending;
		self.updated_at = truncate_millis(now);
	}

	/// Claim order: priority ascending, then creation time ascending.
	///
	/// Stores that can enqueue several jobs within one millisecond break the
	/// remaining tie with their insertion sequence.
	pub fn queue_order(&self, other: &Self) -> Ordering {
		self.priority
			.cmp(&other.priority)
			.then_with(|| self.created_at.cmp(&other.created_at))
	}
}

/// Producer input for enqueueing a job. Unset fields take queue defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueJob {
	#[serde(rename = "type")]
	pub job_type: String,
	#[serde(default)]
	pub payload: serde_json::Value,
	#[serde(default)]
	pub priority: Option<u32>,
	#[serde(default)]
	pub max_attempts: Option<u32>,
	#[serde(default)]
	pub run_after: Option<DateTime<Utc>>,
	#[serde(default)]
	pub agent_id: Option<String>,
}

impl EnqueueJob {
	pub fn new(job_type: impl Into<String>) -> Self {
		Self {
			job_type: job_type.into(),
			payload: serde_json::Value::Null,
			priority: None,
			max_attempts: None,
			run_after: None,
			agent_id: None,
		}
	}

	pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
		self.payload = payload;
		self
	}

	pub fn with_priority(mut self, priority: u32) -> Self {
		self.priority = Some(priority);
		self
	}

	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = Some(max_attempts);
		self
	}

	pub fn with_run_after(mut self, run_after: DateTime<Utc>) -> Self {
		self.run_after = Some(run_after);
		self
	}

	pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
		self.agent_id = Some(agent_id.into());
		self
	}
}

/// Filter for listing jobs. Results are always in queue order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListFilter {
	pub status: Option<JobStatus>,
	pub job_type: Option<String>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

impl JobListFilter {
	pub fn status(status: JobStatus) -> Self {
		Self {
			status: Some(status),
			..Default::default()
		}
	}

	pub fn job_type(job_type: impl Into<String>) -> Self {
		Self {
			job_type: Some(job_type.into()),
			..Default::default()
		}
	}

	pub fn with_limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn with_offset(mut self, offset: u32) -> Self {
		self.offset = Some(offset);
		self
	}

	pub fn matches(&self, job: &JobRecord) -> bool {
		self.status.map_or(true, |s| job.status == s)
			&& self.job_type.as_deref().map_or(true, |t| job.job_type == t)
	}
}

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusCounts {
	pub pending: u64,
	pub running: u64,
	pub completed: u64,
	pub failed: u64,
	pub dead: u64,
}

impl JobStatusCounts {
	pub fn add(&mut self, status: JobStatus, count: u64) {
		match status {
			JobStatus::Pending => self.pending += count,
			JobStatus::Running => self.running += count,
			JobStatus::Completed => self.completed += count,
			JobStatus::Failed => self.failed += count,
			JobStatus::Dead => self.dead += count,
		}
	}

	pub fn total(&self) -> u64 {
		self.pending + self.running + self.completed + self.failed + self.dead
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn enqueue_applies_defaults() {
		let now = Utc::now();
		let job = JobRecord::from_enqueue(EnqueueJob::new("test-job"), now).unwrap();

		assert_eq!(job.job_type, "test-job");
		assert_eq!(job.status, JobStatus::Pending);
		assert_eq!(job.priority, DEFAULT_PRIORITY);
		assert_eq!(job.attempts, 0);
		assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
		assert_eq!(job.run_after, job.created_at);
		assert_eq!(job.payload, serde_json::Value::Null);
		assert!(job.last_error.is_none());
		assert!(job.completed_at.is_none());
	}

	#[test]
	fn enqueue_trims_job_type() {
		let job = JobRecord::from_enqueue(EnqueueJob::new("  padded  "), Utc::now()).unwrap();
		assert_eq!(job.job_type, "padded");
	}

	#[test]
	fn enqueue_rejects_blank_type() {
		let err = JobRecord::from_enqueue(EnqueueJob::new("   "), Utc::now()).unwrap_err();
		assert_eq!(err, JobsError::InvalidJobType);
		assert_eq!(err.to_string(), "Job type is required");
	}

	#[test]
	fn enqueue_rejects_zero_max_attempts() {
		let input = EnqueueJob::new("job").with_max_attempts(0);
		let err = JobRecord::from_enqueue(input, Utc::now()).unwrap_err();
		assert_eq!(err, JobsError::InvalidMaxAttempts(0));
	}

	#[test]
	fn enqueue_keeps_custom_options() {
		let now = Utc::now();
		let run_after = now + chrono::Duration::minutes(1);
		let input = EnqueueJob::new("custom-job")
			.with_payload(serde_json::json!({ "foo": "bar" }))
			.with_priority(1)
			.with_max_attempts(5)
			.with_run_after(run_after)
			.with_agent_id("agent-123");

		let job = JobRecord::from_enqueue(input, now).unwrap();
		assert_eq!(job.payload, serde_json::json!({ "foo": "bar" }));
		assert_eq!(job.priority, 1);
		assert_eq!(job.max_attempts, 5);
		assert_eq!(job.run_after, truncate_millis(run_after));
		assert_eq!(job.agent_id.as_deref(), Some("agent-123"));
		assert!(!job.is_claimable(now));
	}

	#[test]
	fn queue_order_prefers_priority_then_age() {
		let now = Utc::now();
		let early_low = JobRecord::from_enqueue(EnqueueJob::new("a").with_priority(10), now).unwrap();
		let late_high = JobRecord::from_enqueue(
			EnqueueJob::new("b").with_priority(1),
			now + chrono::Duration::seconds(1),
		)
		.unwrap();
		let late_low = JobRecord::from_enqueue(
			EnqueueJob::new("c").with_priority(10),
			now + chrono::Duration::seconds(2),
		)
		.unwrap();

		let mut jobs = vec![late_low.clone(), early_low.clone(), late_high.clone()];
		jobs.sort_by(|a, b| a.queue_order(b));
		assert_eq!(jobs[0].id, late_high.id);
		assert_eq!(jobs[1].id, early_low.id);
		assert_eq!(jobs[2].id, late_low.id);
	}

	#[test]
	fn serializes_type_field_name() {
		let job = JobRecord::from_enqueue(EnqueueJob::new("report"), Utc::now()).unwrap();
		let value = serde_json::to_value(&job).unwrap();
		assert_eq!(value["type"], "report");
		assert_eq!(value["status"], "pending");

		let parsed: JobRecord = serde_json::from_value(value).unwrap();
		assert_eq!(parsed, job);
	}

	#[test]
	fn failure_retries_until_attempts_exhausted() {
		let now = Utc::now();
		let mut job =
			JobRecord::from_enqueue(EnqueueJob::new("flaky").with_max_attempts(2), now).unwrap();

		job.mark_running(now);
		assert_eq!(job.status, JobStatus::Running);
		assert_eq!(job.attempts, 1);

		job.mark_failed("first", Duration::from_secs(5), now);
		assert_eq!(job.status, JobStatus::Pending);
		assert_eq!(job.last_error.as_deref(), Some("first"));
		assert_eq!(job.run_after, truncate_millis(now) + chrono::Duration::seconds(5));
		assert!(job.completed_at.is_none());

		job.mark_running(now);
		job.mark_failed("second", Duration::ZERO, now);
		assert_eq!(job.status, JobStatus::Dead);
		assert_eq!(job.attempts, 2);
		assert_eq!(job.last_error.as_deref(), Some("second"));
		assert_eq!(job.completed_at, Some(truncate_millis(now)));
	}

	#[test]
	fn failure_never_moves_run_after_backwards() {
		let now = Utc::now();
		let later = now + chrono::Duration::minutes(10);
		let mut job =
			JobRecord::from_enqueue(EnqueueJob::new("delayed").with_run_after(later), now).unwrap();

		job.mark_failed("early failure", Duration::ZERO, now);
		assert_eq!(job.status, JobStatus::Pending);
		assert_eq!(job.run_after, truncate_millis(later));
	}

	#[test]
	fn reset_to_pending_keeps_attempts() {
		let now = Utc::now();
		let mut job = JobRecord::from_enqueue(EnqueueJob::new("crashy"), now).unwrap();
		job.mark_running(now);
		job.reset_to_pending(now);
		assert_eq!(job.status, JobStatus::Pending);
		assert_eq!(job.attempts, 1);
		assert!(job.is_claimable(now));
	}

	#[test]
	fn list_filter_matches() {
		let job = JobRecord::from_enqueue(EnqueueJob::new("type-a"), Utc::now()).unwrap();
		assert!(JobListFilter::default().matches(&job));
		assert!(JobListFilter::status(JobStatus::Pending).matches(&job));
		assert!(!JobListFilter::status(JobStatus::Dead).matches(&job));
		assert!(JobListFilter::job_type("type-a").matches(&job));
		assert!(!JobListFilter::job_type("type-b").matches(&job));
	}

	#[test]
	fn status_counts_total() {
		let mut counts = JobStatusCounts::default();
		counts.add(JobStatus::Pending, 2);
		counts.add(JobStatus::Dead, 1);
		assert_eq!(counts.pending, 2);
		assert_eq!(counts.dead, 1);
		assert_eq!(counts.total(), 3);
	}

	#[test]
	fn terminal_statuses() {
		assert!(JobStatus::Completed.is_terminal());
		assert!(JobStatus::Dead.is_terminal());
		assert!(!JobStatus::Pending.is_terminal());
		assert!(!JobStatus::Running.is_terminal());
		assert!(!JobStatus::Failed.is_terminal());
	}

	proptest! {
		#[test]
		fn job_status_roundtrip(status in prop_oneof![
			Just(JobStatus::Pending),
			Just(JobStatus::Running),
			Just(JobStatus::Completed),
			Just(JobStatus::Failed),
			Just(JobStatus::Dead),
		]) {
			let s = status.to_string();
			let parsed: JobStatus = s.parse().unwrap();
			prop_assert_eq!(status, parsed);
		}

		#[test]
		fn job_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let id = JobId(Uuid::from_bytes(uuid_bytes));
			let parsed: JobId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}
	}
}
