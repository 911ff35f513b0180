// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The job store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use loom_jobs_core::{EnqueueJob, JobId, JobListFilter, JobRecord, JobStatusCounts};

use crate::error::Result;

/// Durable job persistence and every job state transition.
///
/// Implementations serialize all mutating calls through one critical section
/// per store instance, and a mutation is durable once it returns. Reads may
/// observe any already-persisted state.
#[async_trait]
pub trait JobStore: Send + Sync {
	/// Validate and persist a new `pending` job.
	async fn enqueue(&self, input: EnqueueJob) -> Result<JobRecord>;

	async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

	/// Jobs matching `filter`, in claim order.
	async fn list(&self, filter: &JobListFilter) -> Result<Vec<JobRecord>>;

	/// Atomically move the best eligible `pending` job to `running`.
	///
	/// Eligible means `run_after <= now`. Two concurrent callers never
	/// receive the same job.
	async fn claim_next(&self) -> Result<Option<JobRecord>>;

	/// Mark a `running` job `completed`. `None` if the job does not exist or
	/// is not running.
	async fn complete(&self, id: JobId) -> Result<Option<JobRecord>>;

	/// Record a failed attempt.
	///
	/// Dead-letters the job once `attempts >= max_attempts`, otherwise puts it
	/// back to `pending` no earlier than `now + backoff`. `None` if the job
	/// does not exist.
	async fn fail(&self, id: JobId, error: &str, backoff: Duration) -> Result<Option<JobRecord>>;

	/// Delete a `pending` job. False for any other status or unknown id.
	async fn cancel(&self, id: JobId) -> Result<bool>;

	/// Delete `completed` and `dead` jobs finished before `older_than`.
	async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64>;

	/// Reset every `running` job to `pending` without touching `attempts`.
	///
	/// Releases claims left behind by an unclean shutdown. Only the first call
	/// on a store instance resets anything: after it, every `running` job was
	/// claimed through this instance and is still owned by a live scheduler.
	/// Later calls return 0.
	async fn recover_running_jobs(&self) -> Result<u64>;

	async fn count_by_status(&self) -> Result<JobStatusCounts>;
}
