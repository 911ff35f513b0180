// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite-backed job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

use loom_jobs_core::time::{from_millis, now_millis, to_millis};
use loom_jobs_core::{EnqueueJob, JobId, JobListFilter, JobRecord, JobStatus, JobStatusCounts};

use crate::error::{JobError, Result};
use crate::pool::{create_pool, create_pool_at};
use crate::schema::run_migrations;
use crate::store::JobStore;

const JOB_COLUMNS: &str = "id, job_type, payload, priority, status, attempts, max_attempts, \
	run_after, last_error, created_at, updated_at, completed_at, agent_id";

const QUEUE_ORDER: &str = "priority ASC, created_at ASC, seq ASC";

/// Production [`JobStore`] over a SQLite database.
///
/// Mutations take the per-instance write lock; claims are additionally a
/// single `UPDATE ... RETURNING` statement so they stay atomic against other
/// connections. Reads go straight to the pool.
///
/// Clones share the pool, the write lock and the recovery state.
#[derive(Clone)]
pub struct SqliteJobStore {
	pool: SqlitePool,
	write_lock: Arc<Mutex<()>>,
	recovered: Arc<AtomicBool>,
}

impl SqliteJobStore {
	/// Wrap an existing pool. The schema must already exist, see
	/// [`run_migrations`].
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			write_lock: Arc::new(Mutex::new(())),
			recovered: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Connect to `database_url` and create the schema if needed.
	pub async fn open(database_url: &str) -> Result<Self> {
		let pool = create_pool(database_url).await?;
		run_migrations(&pool).await?;
		Ok(Self::new(pool))
	}

	/// Open (or create) the database file at `path` and create the schema if
	/// needed.
	pub async fn open_path(path: &Path) -> Result<Self> {
		let pool = create_pool_at(path).await?;
		run_migrations(&pool).await?;
		Ok(Self::new(pool))
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Close the pool. Pending writes are already committed.
	pub async fn close(&self) {
		self.pool.close().await;
	}

	async fn fetch(&self, id: JobId) -> Result<Option<JobRecord>> {
		let sql = format!("SELECT {JOB_COLUMNS} FROM queued_jobs WHERE id = ?");
		let row = sqlx::query_as::<_, JobRow>(&sql)
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row.map(JobRecord::try_from).transpose()
	}
}

#[async_trait]
impl JobStore for SqliteJobStore {
	#[instrument(skip(self, input), fields(job_type = %input.job_type))]
	async fn enqueue(&self, input: EnqueueJob) -> Result<JobRecord> {
		let job = JobRecord::from_enqueue(input, now_millis())?;
		let payload = serde_json::to_string(&job.payload)?;

		let _guard = self.write_lock.lock().await;
		sqlx::query(
			r#"
			INSERT INTO queued_jobs (
				id, job_type, payload, priority, status, attempts, max_attempts,
				run_after, last_error, created_at, updated_at, completed_at, agent_id
			)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(job.id.to_string())
		.bind(&job.job_type)
		.bind(payload)
		.bind(job.priority as i64)
		.bind(job.status.as_str())
		.bind(job.attempts as i64)
		.bind(job.max_attempts as i64)
		.bind(to_millis(job.run_after))
		.bind(&job.last_error)
		.bind(to_millis(job.created_at))
		.bind(to_millis(job.updated_at))
		.bind(job.completed_at.map(to_millis))
		.bind(&job.agent_id)
		.execute(&self.pool)
		.await?;

		tracing::info!(job_id = %job.id, job_type = %job.job_type, "job enqueued");
		Ok(job)
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
		self.fetch(id).await
	}

	#[instrument(skip(self))]
	async fn list(&self, filter: &JobListFilter) -> Result<Vec<JobRecord>> {
		let sql = format!(
			"SELECT {JOB_COLUMNS} FROM queued_jobs \
			WHERE (? IS NULL OR status = ?) AND (? IS NULL OR job_type = ?) \
			ORDER BY {QUEUE_ORDER} LIMIT ? OFFSET ?"
		);
		let status = filter.status.map(|s| s.as_str());
		let rows = sqlx::query_as::<_, JobRow>(&sql)
			.bind(status)
			.bind(status)
			.bind(filter.job_type.as_deref())
			.bind(filter.job_type.as_deref())
			.bind(filter.limit.map(i64::from).unwrap_or(-1))
			.bind(filter.offset.map(i64::from).unwrap_or(0))
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(JobRecord::try_from).collect()
	}

	#[instrument(skip(self))]
	async fn claim_next(&self) -> Result<Option<JobRecord>> {
		let now = to_millis(now_millis());
		let sql = format!(
			"UPDATE queued_jobs \
			SET status = 'running', attempts = attempts + 1, updated_at = ? \
			WHERE status = 'pending' AND seq = ( \
				SELECT seq FROM queued_jobs \
				WHERE status = 'pending' AND run_after <= ? \
				ORDER BY {QUEUE_ORDER} LIMIT 1 \
			) \
			RETURNING {JOB_COLUMNS}"
		);

		let _guard = self.write_lock.lock().await;
		let row = sqlx::query_as::<_, JobRow>(&sql)
			.bind(now)
			.bind(now)
			.fetch_optional(&self.pool)
			.await?;

		let job = row.map(JobRecord::try_from).transpose()?;
		if let Some(job) = &job {
			tracing::debug!(
				job_id = %job.id,
				job_type = %job.job_type,
				attempt = job.attempts,
				"job claimed"
			);
		}
		Ok(job)
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn complete(&self, id: JobId) -> Result<Option<JobRecord>> {
		let now = to_millis(now_millis());
		let sql = format!(
			"UPDATE queued_jobs \
			SET status = 'completed', completed_at = ?, updated_at = ? \
			WHERE id = ? AND status = 'running' \
			RETURNING {JOB_COLUMNS}"
		);

		let _guard = self.write_lock.lock().await;
		let row = sqlx::query_as::<_, JobRow>(&sql)
			.bind(now)
			.bind(now)
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => {
				let job = JobRecord::try_from(row)?;
				tracing::info!(job_id = %id, job_type = %job.job_type, "job completed");
				Ok(Some(job))
			}
			None => {
				tracing::warn!(job_id = %id, "complete: job not found or not running");
				Ok(None)
			}
		}
	}

	#[instrument(skip(self, error), fields(job_id = %id))]
	async fn fail(&self, id: JobId, error: &str, backoff: Duration) -> Result<Option<JobRecord>> {
		let _guard = self.write_lock.lock().await;
		let mut tx = self.pool.begin().await?;

		let sql = format!("SELECT {JOB_COLUMNS} FROM queued_jobs WHERE id = ?");
		let row = sqlx::query_as::<_, JobRow>(&sql)
			.bind(id.to_string())
			.fetch_optional(&mut *tx)
			.await?;

		let Some(row) = row else {
			tracing::warn!(job_id = %id, "fail: job not found");
			return Ok(None);
		};

		let mut job = JobRecord::try_from(row)?;
		job.mark_failed(error, backoff, now_millis());

		sqlx::query(
			r#"
			UPDATE queued_jobs
			SET status = ?, last_error = ?, run_after = ?, completed_at = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(job.status.as_str())
		.bind(&job.last_error)
		.bind(to_millis(job.run_after))
		.bind(job.completed_at.map(to_millis))
		.bind(to_millis(job.updated_at))
		.bind(id.to_string())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		tracing::info!(
			job_id = %id,
			job_type = %job.job_type,
			status = %job.status,
			attempts = job.attempts,
			"job failure recorded"
		);
		Ok(Some(job))
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn cancel(&self, id: JobId) -> Result<bool> {
		let _guard = self.write_lock.lock().await;
		let result = sqlx::query("DELETE FROM queued_jobs WHERE id = ? AND status = 'pending'")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;

		let cancelled = result.rows_affected() > 0;
		if cancelled {
			tracing::info!(job_id = %id, "job cancelled");
		}
		Ok(cancelled)
	}

	#[instrument(skip(self))]
	async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64> {
		let _guard = self.write_lock.lock().await;
		let result = sqlx::query(
			r#"
			DELETE FROM queued_jobs
			WHERE status IN ('completed', 'dead')
			  AND completed_at IS NOT NULL
			  AND completed_at < ?
			"#,
		)
		.bind(to_millis(older_than))
		.execute(&self.pool)
		.await?;

		let pruned = result.rows_affected();
		if pruned > 0 {
			tracing::info!(pruned, "terminal jobs pruned");
		}
		Ok(pruned)
	}

	#[instrument(skip(self))]
	async fn recover_running_jobs(&self) -> Result<u64> {
		let _guard = self.write_lock.lock().await;
		if self.recovered.load(Ordering::Acquire) {
			return Ok(0);
		}

		let result =
			sqlx::query("UPDATE queued_jobs SET status = 'pending', updated_at = ? WHERE status = 'running'")
				.bind(to_millis(now_millis()))
				.execute(&self.pool)
				.await?;

		self.recovered.store(true, Ordering::Release);

		let recovered = result.rows_affected();
		if recovered > 0 {
			tracing::info!(recovered, "running jobs reset to pending");
		}
		Ok(recovered)
	}

	#[instrument(skip(self))]
	async fn count_by_status(&self) -> Result<JobStatusCounts> {
		let rows = sqlx::query_as::<_, (String, i64)>(
			"SELECT status, COUNT(*) FROM queued_jobs GROUP BY status",
		)
		.fetch_all(&self.pool)
		.await?;

		let mut counts = JobStatusCounts::default();
		for (status, count) in rows {
			let status: JobStatus = status
				.parse()
				.map_err(|_| JobError::Internal(format!("Invalid status: {status}")))?;
			counts.add(status, count as u64);
		}
		Ok(counts)
	}
}

// Database row type for sqlx

#[derive(sqlx::FromRow)]
struct JobRow {
	id: String,
	job_type: String,
	payload: String,
	priority: i64,
	status: String,
	attempts: i64,
	max_attempts: i64,
	run_after: i64,
	last_error: Option<String>,
	created_at: i64,
	updated_at: i64,
	completed_at: Option<i64>,
	agent_id: Option<String>,
}

fn timestamp(ms: i64, column: &str) -> Result<DateTime<Utc>> {
	from_millis(ms).ok_or_else(|| JobError::Internal(format!("Invalid {column}: {ms}")))
}

impl TryFrom<JobRow> for JobRecord {
	type Error = JobError;

	fn try_from(row: JobRow) -> Result<Self> {
		Ok(JobRecord {
			id: row
				.id
				.parse()
				.map_err(|_| JobError::Internal(format!("Invalid job ID: {}", row.id)))?,
			job_type: row.job_type,
			payload: serde_json::from_str(&row.payload)?,
			priority: row.priority as u32,
			status: row
				.status
				.parse()
				.map_err(|_| JobError::Internal(format!("Invalid status: {}", row.status)))?,
			attempts: row.attempts as u32,
			max_attempts: row.max_attempts as u32,
			run_after: timestamp(row.run_after, "run_after")?,
			last_error: row.last_error,
			created_at: timestamp(row.created_at, "created_at")?,
			updated_at: timestamp(row.updated_at, "updated_at")?,
			completed_at: row
				.completed_at
				.map(|ms| timestamp(ms, "completed_at"))
				.transpose()?,
			agent_id: row.agent_id,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn open_store() -> (SqliteJobStore, TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let store = SqliteJobStore::open_path(&dir.path().join("jobs.db"))
			.await
			.unwrap();
		(store, dir)
	}

	#[tokio::test]
	async fn test_enqueue_and_get() {
		let (store, _dir) = open_store().await;

		let job = store
			.enqueue(
				EnqueueJob::new("test-job")
					.with_payload(serde_json::json!({ "foo": "bar" }))
					.with_agent_id("agent-123"),
			)
			.await
			.unwrap();

		let fetched = store.get(job.id).await.unwrap().unwrap();
		assert_eq!(fetched, job);
	}

	#[tokio::test]
	async fn test_get_unknown_returns_none() {
		let (store, _dir) = open_store().await;
		assert!(store.get(JobId::new()).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_enqueue_rejects_blank_type() {
		let (store, _dir) = open_store().await;
		let err = store.enqueue(EnqueueJob::new("  ")).await.unwrap_err();
		assert!(matches!(err, JobError::Validation(_)));
		assert_eq!(err.to_string(), "Job type is required");
		assert_eq!(store.count_by_status().await.unwrap().total(), 0);
	}

	#[tokio::test]
	async fn test_claim_same_millisecond_is_fifo() {
		let (store, _dir) = open_store().await;

		let mut ids = Vec::new();
		for i in 0..5 {
			ids.push(store.enqueue(EnqueueJob::new(format!("job-{i}"))).await.unwrap().id);
		}

		for id in ids {
			assert_eq!(store.claim_next().await.unwrap().unwrap().id, id);
		}
		assert!(store.claim_next().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let (store, _dir) = open_store().await;
		run_migrations(store.pool()).await.unwrap();
		run_migrations(store.pool()).await.unwrap();
	}

	#[tokio::test]
	async fn test_corrupt_status_is_internal_error() {
		let (store, _dir) = open_store().await;
		let job = store.enqueue(EnqueueJob::new("test-job")).await.unwrap();

		sqlx::query("UPDATE queued_jobs SET status = 'bogus' WHERE id = ?")
			.bind(job.id.to_string())
			.execute(store.pool())
			.await
			.unwrap();

		let err = store.get(job.id).await.unwrap_err();
		assert!(matches!(err, JobError::Internal(_)));
	}
}
