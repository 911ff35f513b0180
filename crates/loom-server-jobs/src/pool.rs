// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;

use crate::error::{JobError, Result};

/// Create a SqlitePool for the job store.
///
/// WAL journal with `synchronous = FULL`: a committed write survives power
/// loss, so every store mutation is durable once it returns.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./jobs.db?mode=rwc")
///
/// # Errors
/// Returns `JobError::Internal` if the URL is invalid, `JobError::Database`
/// if the connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| JobError::Internal(format!("Invalid database URL: {e}")))?;
	connect(options).await
}

/// Create a SqlitePool over a database file, creating it if missing.
#[tracing::instrument(skip(path), fields(path = %path.display()))]
pub async fn create_pool_at(path: &Path) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::new().filename(path);
	connect(options).await
}

async fn connect(options: SqliteConnectOptions) -> Result<SqlitePool> {
	let options = options
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Full)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("job database pool created");
	Ok(pool)
}
