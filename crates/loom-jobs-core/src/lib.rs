// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom durable job queue.
//!
//! This crate holds the pieces shared by every job store and by the scheduler
//! in `loom-server-jobs`:
//! - [`JobRecord`], the persisted unit of work and its scheduling state
//! - [`EnqueueJob`] and [`JobListFilter`], the producer-facing inputs
//! - [`BackoffPolicy`], the exponential retry delay with jitter
//!
//! # Example
//!
//! ```
//! use loom_jobs_core::{EnqueueJob, JobRecord, JobStatus};
//!
//! let input = EnqueueJob::new("memory.compact")
//!     .with_payload(serde_json::json!({ "agent": "a-1" }))
//!     .with_priority(1);
//!
//! let job = JobRecord::from_enqueue(input, chrono::Utc::now()).unwrap();
//! assert_eq!(job.status, JobStatus::Pending);
//! assert_eq!(job.attempts, 0);
//! ```

pub mod backoff;
pub mod error;
pub mod job;
pub mod time;

pub use backoff::{BackoffPolicy, JITTER_RATIO};
pub use error::{JobsError, Result};
pub use job::{
	EnqueueJob, JobId, JobListFilter, JobRecord, JobStatus, JobStatusCounts, DEFAULT_MAX_ATTEMPTS,
	DEFAULT_PRIORITY,
};
