// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job handlers, registered with the scheduler per job type.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use loom_jobs_core::JobRecord;

/// Error returned by a handler. Converted to the job's `last_error` text.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
	Success,
	Failure { error: Option<String> },
}

impl JobOutcome {
	pub fn failure(error: impl Into<String>) -> Self {
		JobOutcome::Failure {
			error: Some(error.into()),
		}
	}
}

/// Executes jobs of one type.
///
/// Handlers should be idempotent: delivery is at-least-once and a job whose
/// process crashed mid-run is executed again after recovery.
#[async_trait]
pub trait JobHandler: Send + Sync {
	async fn handle(&self, job: &JobRecord) -> Result<JobOutcome, HandlerError>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
	f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
	F: Fn(JobRecord) -> Fut + Send + Sync,
	Fut: Future<Output = Result<JobOutcome, HandlerError>> + Send,
{
	async fn handle(&self, job: &JobRecord) -> Result<JobOutcome, HandlerError> {
		(self.f)(job.clone()).await
	}
}

/// Build a handler from an async closure.
///
/// ```ignore
/// scheduler.register_handler(
///     "memory.compact",
///     handler_fn(|job| async move {
///         compact(&job.payload).await?;
///         Ok(JobOutcome::Success)
///     }),
/// );
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
	F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<JobOutcome, HandlerError>> + Send + 'static,
{
	Arc::new(FnHandler { f })
}
