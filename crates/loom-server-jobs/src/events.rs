// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_jobs_core::JobRecord;

/// Callbacks fired by the scheduler after each job outcome is persisted.
///
/// Hosts use these for alerting (`on_job_dead`) and metrics. They run on the
/// poll task, so keep them short.
pub trait JobEvents: Send + Sync {
	fn on_job_complete(&self, _job: &JobRecord) {}

	/// The attempt failed and the job is scheduled for another try.
	fn on_job_failed(&self, _job: &JobRecord, _error: &str) {}

	/// The job exhausted its attempts.
	fn on_job_dead(&self, _job: &JobRecord) {}
}

pub struct NoopJobEvents;

impl JobEvents for NoopJobEvents {}
