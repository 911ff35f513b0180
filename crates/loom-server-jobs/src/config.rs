// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job queue configuration.
//!
//! Layered from multiple sources, highest precedence last:
//! 1. Built-in defaults
//! 2. TOML file (`[jobs]` table)
//! 3. Environment variables (`LOOM_SERVER_JOBS_*`)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use loom_jobs_core::BackoffPolicy;

const DEFAULT_DATABASE_URL: &str = "sqlite:./jobs.db?mode=rwc";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 300_000; // 5 minutes
const DEFAULT_PRUNE_INTERVAL_MS: u64 = 3_600_000; // 1 hour
const DEFAULT_PRUNE_AGE_MS: u64 = 86_400_000; // 24 hours
const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 900_000; // 15 minutes

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub database_url: Option<String>,
	pub poll_interval_ms: Option<u64>,
	pub retry_backoff_base_ms: Option<u64>,
	pub retry_backoff_max_ms: Option<u64>,
	pub prune_interval_ms: Option<u64>,
	pub prune_age_ms: Option<u64>,
	/// Zero disables the timeout.
	pub handler_timeout_ms: Option<u64>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.retry_backoff_base_ms.is_some() {
			self.retry_backoff_base_ms = other.retry_backoff_base_ms;
		}
		if other.retry_backoff_max_ms.is_some() {
			self.retry_backoff_max_ms = other.retry_backoff_max_ms;
		}
		if other.prune_interval_ms.is_some() {
			self.prune_interval_ms = other.prune_interval_ms;
		}
		if other.prune_age_ms.is_some() {
			self.prune_age_ms = other.prune_age_ms;
		}
		if other.handler_timeout_ms.is_some() {
			self.handler_timeout_ms = other.handler_timeout_ms;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		JobsConfig {
			database_url: self
				.database_url
				.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
			poll_interval_ms: self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
			retry_backoff_base_ms: self
				.retry_backoff_base_ms
				.unwrap_or(DEFAULT_RETRY_BACKOFF_BASE_MS),
			retry_backoff_max_ms: self
				.retry_backoff_max_ms
				.unwrap_or(DEFAULT_RETRY_BACKOFF_MAX_MS),
			prune_interval_ms: self.prune_interval_ms.unwrap_or(DEFAULT_PRUNE_INTERVAL_MS),
			prune_age_ms: self.prune_age_ms.unwrap_or(DEFAULT_PRUNE_AGE_MS),
			handler_timeout_ms: self.handler_timeout_ms.unwrap_or(DEFAULT_HANDLER_TIMEOUT_MS),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	pub database_url: String,
	pub poll_interval_ms: u64,
	pub retry_backoff_base_ms: u64,
	pub retry_backoff_max_ms: u64,
	pub prune_interval_ms: u64,
	pub prune_age_ms: u64,
	pub handler_timeout_ms: u64,
}

impl Default for JobsConfig {
	fn default() -> Self {
		JobsConfigLayer::default().finalize()
	}
}

impl JobsConfig {
	pub fn scheduler(&self) -> SchedulerConfig {
		SchedulerConfig {
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			backoff: BackoffPolicy::new(
				Duration::from_millis(self.retry_backoff_base_ms),
				Duration::from_millis(self.retry_backoff_max_ms),
			),
			prune_interval: Duration::from_millis(self.prune_interval_ms),
			prune_age: Duration::from_millis(self.prune_age_ms),
			handler_timeout: (self.handler_timeout_ms > 0)
				.then(|| Duration::from_millis(self.handler_timeout_ms)),
		}
	}
}

/// Resolved scheduler tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
	/// Sleep between passes that found no work.
	pub poll_interval: Duration,
	pub backoff: BackoffPolicy,
	pub prune_interval: Duration,
	/// Retention for `completed` and `dead` jobs.
	pub prune_age: Duration,
	/// `None` lets a handler run forever.
	pub handler_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		JobsConfig::default().scheduler()
	}
}

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<JobsConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<JobsConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(JobsConfigLayer::default())
	}
}

#[derive(Debug, Default, Deserialize)]
struct TomlFile {
	#[serde(default)]
	jobs: JobsConfigLayer,
}

/// TOML file configuration source. Reads the `[jobs]` table.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<JobsConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(JobsConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let file: TomlFile = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed jobs config layer from TOML");
		Ok(file.jobs)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_SERVER_JOBS_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<JobsConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_from_env(|name| std::env::var(name).ok())
	}
}

fn load_from_env(
	lookup: impl Fn(&str) -> Option<String>,
) -> Result<JobsConfigLayer, ConfigError> {
	let var = |name: &str| lookup(name).filter(|s| !s.is_empty());
	let u64_var = |name: &str| -> Result<Option<u64>, ConfigError> {
		match var(name) {
			Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid u64 value '{v}'"),
			}),
			None => Ok(None),
		}
	};

	Ok(JobsConfigLayer {
		database_url: var("LOOM_SERVER_JOBS_DATABASE_URL"),
		poll_interval_ms: u64_var("LOOM_SERVER_JOBS_POLL_INTERVAL_MS")?,
		retry_backoff_base_ms: u64_var("LOOM_SERVER_JOBS_RETRY_BACKOFF_BASE_MS")?,
		retry_backoff_max_ms: u64_var("LOOM_SERVER_JOBS_RETRY_BACKOFF_MAX_MS")?,
		prune_interval_ms: u64_var("LOOM_SERVER_JOBS_PRUNE_INTERVAL_MS")?,
		prune_age_ms: u64_var("LOOM_SERVER_JOBS_PRUNE_AGE_MS")?,
		handler_timeout_ms: u64_var("LOOM_SERVER_JOBS_HANDLER_TIMEOUT_MS")?,
	})
}

/// Resolve configuration from `sources` in precedence order.
pub fn load_config_from(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<JobsConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = JobsConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	Ok(merged.finalize())
}

/// Load configuration from defaults, the system config file, and the
/// environment.
pub fn load_config() -> Result<JobsConfig, ConfigError> {
	load_config_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}
