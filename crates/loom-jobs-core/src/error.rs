// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for job queue validation.

use thiserror::Error;

/// Result type for job queue core operations.
pub type Result<T> = std::result::Result<T, JobsError>;

/// Errors raised synchronously to producers. These are never stored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobsError {
	#[error("Job type is required")]
	InvalidJobType,

	#[error("max_attempts must be at least 1, got {0}")]
	InvalidMaxAttempts(u32),

	#[error("unknown job status: {0}")]
	UnknownStatus(String),
}
