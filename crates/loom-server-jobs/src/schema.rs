// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::SqlitePool;

use crate::error::Result;

// `seq` keeps FIFO order between jobs enqueued within the same millisecond.
const CREATE_QUEUED_JOBS: &str = r#"
	CREATE TABLE IF NOT EXISTS queued_jobs (
		seq INTEGER PRIMARY KEY AUTOINCREMENT,
		id TEXT NOT NULL UNIQUE,
		job_type TEXT NOT NULL,
		payload TEXT NOT NULL,
		priority INTEGER NOT NULL DEFAULT 5,
		status TEXT NOT NULL,
		attempts INTEGER NOT NULL DEFAULT 0,
		max_attempts INTEGER NOT NULL DEFAULT 3,
		run_after INTEGER NOT NULL,
		last_error TEXT,
		created_at INTEGER NOT NULL,
		updated_at INTEGER NOT NULL,
		completed_at INTEGER,
		agent_id TEXT
	)
"#;

const CREATE_CLAIM_INDEX: &str = r#"
	CREATE INDEX IF NOT EXISTS idx_queued_jobs_claim
	ON queued_jobs (status, priority, created_at, seq)
"#;

const CREATE_PRUNE_INDEX: &str = r#"
	CREATE INDEX IF NOT EXISTS idx_queued_jobs_completed_at
	ON queued_jobs (status, completed_at)
"#;

/// Create the job queue tables. Safe to run on every startup.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
	for statement in [CREATE_QUEUED_JOBS, CREATE_CLAIM_INDEX, CREATE_PRUNE_INDEX] {
		sqlx::query(statement).execute(pool).await?;
	}

	tracing::debug!("job queue schema ready");
	Ok(())
}
