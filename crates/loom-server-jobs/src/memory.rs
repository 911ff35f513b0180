// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory job store.
//!
//! Same transitions and ordering as [`crate::SqliteJobStore`] without the
//! durability. Used by scheduler tests and by hosts that embed the queue
//! without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

use loom_jobs_core::time::now_millis;
use loom_jobs_core::{EnqueueJob, JobId, JobListFilter, JobRecord, JobStatus, JobStatusCounts};

use crate::error::Result;
use crate::store::JobStore;

struct Entry {
	seq: u64,
	job: JobRecord,
}

#[derive(Default)]
struct State {
	jobs: HashMap<JobId, Entry>,
	next_seq: u64,
	recovered: bool,
}

impl State {
	fn sorted(&self) -> Vec<&Entry> {
		let mut entries: Vec<&Entry> = self.jobs.values().collect();
		entries.sort_by(|a, b| a.job.queue_order(&b.job).then(a.seq.cmp(&b.seq)));
		entries
	}
}

#[derive(Default)]
pub struct MemoryJobStore {
	state: Mutex<State>,
}

impl MemoryJobStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a record as-is, bypassing validation and defaults.
	///
	/// Lets tests stage states such as an orphaned `running` job.
	pub async fn insert(&self, job: JobRecord) {
		let mut state = self.state.lock().await;
		let seq = state.next_seq;
		state.next_seq += 1;
		state.jobs.insert(job.id, Entry { seq, job });
	}
}

#[async_trait]
impl JobStore for MemoryJobStore {
	#[instrument(skip(self, input), fields(job_type = %input.job_type))]
	async fn enqueue(&self, input: EnqueueJob) -> Result<JobRecord> {
		let job = JobRecord::from_enqueue(input, now_millis())?;
		self.insert(job.clone()).await;
		tracing::info!(job_id = %job.id, job_type = %job.job_type, "job enqueued");
		Ok(job)
	}

	async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
		let state = self.state.lock().await;
		Ok(state.jobs.get(&id).map(|entry| entry.job.clone()))
	}

	async fn list(&self, filter: &JobListFilter) -> Result<Vec<JobRecord>> {
		let state = self.state.lock().await;
		let offset = filter.offset.unwrap_or(0) as usize;
		let limit = filter.limit.map_or(usize::MAX, |l| l as usize);

		Ok(state
			.sorted()
			.into_iter()
			.filter(|entry| filter.matches(&entry.job))
			.skip(offset)
			.take(limit)
			.map(|entry| entry.job.clone())
			.collect())
	}

	#[instrument(skip(self))]
	async fn claim_next(&self) -> Result<Option<JobRecord>> {
		let now = now_millis();
		let mut state = self.state.lock().await;

		let next = state
			.sorted()
			.into_iter()
			.find(|entry| entry.job.is_claimable(now))
			.map(|entry| entry.job.id);

		let Some(id) = next else {
			return Ok(None);
		};
		let Some(entry) = state.jobs.get_mut(&id) else {
			return Ok(None);
		};

		entry.job.mark_running(now);
		tracing::debug!(
			job_id = %id,
			job_type = %entry.job.job_type,
			attempt = entry.job.attempts,
			"job claimed"
		);
		Ok(Some(entry.job.clone()))
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn complete(&self, id: JobId) -> Result<Option<JobRecord>> {
		let mut state = self.state.lock().await;
		let Some(entry) = state
			.jobs
			.get_mut(&id)
			.filter(|entry| entry.job.status == JobStatus::Running)
		else {
			tracing::warn!(job_id = %id, "complete: job not found or not running");
			return Ok(None);
		};

		entry.job.mark_completed(now_millis());
		tracing::info!(job_id = %id, job_type = %entry.job.job_type, "job completed");
		Ok(Some(entry.job.clone()))
	}

	#[instrument(skip(self, error), fields(job_id = %id))]
	async fn fail(&self, id: JobId, error: &str, backoff: Duration) -> Result<Option<JobRecord>> {
		let mut state = self.state.lock().await;
		let Some(entry) = state.jobs.get_mut(&id) else {
			tracing::warn!(job_id = %id, "fail: job not found");
			return Ok(None);
		};

		entry.job.mark_failed(error, backoff, now_millis());
		tracing::info!(
			job_id = %id,
			job_type = %entry.job.job_type,
			status = %entry.job.status,
			attempts = entry.job.attempts,
			"job failure recorded"
		);
		Ok(Some(entry.job.clone()))
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn cancel(&self, id: JobId) -> Result<bool> {
		let mut state = self.state.lock().await;
		let pending = state
			.jobs
			.get(&id)
			.is_some_and(|entry| entry.job.status == JobStatus::Pending);
		if !pending {
			return Ok(false);
		}

		state.jobs.remove(&id);
		tracing::info!(job_id = %id, "job cancelled");
		Ok(true)
	}

	#[instrument(skip(self))]
	async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64> {
		let mut state = self.state.lock().await;
		let before = state.jobs.len();
		state.jobs.retain(|_, entry| {
			let expired = entry.job.status.is_terminal()
				&& entry.job.completed_at.is_some_and(|at| at < older_than);
			!expired
		});

		let pruned = (before - state.jobs.len()) as u64;
		if pruned > 0 {
			tracing::info!(pruned, "terminal jobs pruned");
		}
		Ok(pruned)
	}

	#[instrument(skip(self))]
	async fn recover_running_jobs(&self) -> Result<u64> {
		let now = now_millis();
		let mut state = self.state.lock().await;
		if state.recovered {
			return Ok(0);
		}
		state.recovered = true;

		let mut recovered = 0;
		for entry in state.jobs.values_mut() {
			if entry.job.status == JobStatus::Running {
				entry.job.reset_to_pending(now);
				recovered += 1;
			}
		}

		if recovered > 0 {
			tracing::info!(recovered, "running jobs reset to pending");
		}
		Ok(recovered)
	}

	async fn count_by_status(&self) -> Result<JobStatusCounts> {
		let state = self.state.lock().await;
		let mut counts = JobStatusCounts::default();
		for entry in state.jobs.values() {
			counts.add(entry.job.status, 1);
		}
		Ok(counts)
	}
}
