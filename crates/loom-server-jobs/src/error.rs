// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for job store and scheduler operations.

use loom_jobs_core::JobsError;
use thiserror::Error;

/// Result type for job store and scheduler operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors that can occur in job store and scheduler operations.
#[derive(Debug, Error)]
pub enum JobError {
	#[error(transparent)]
	Validation(#[from] JobsError),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("internal error: {0}")]
	Internal(String),
}
