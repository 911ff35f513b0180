// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable priority job queue for Loom server.
//!
//! Producers [`JobStore::enqueue`] typed jobs; a [`JobScheduler`] polls the
//! store, claims the highest-priority runnable job, runs the handler
//! registered for its type, and records the outcome. Failed jobs retry with
//! exponential backoff until their attempt budget is spent, then move to
//! `dead`. Jobs left `running` by a crashed process are recovered on start.
//!
//! The production store is [`SqliteJobStore`]; [`MemoryJobStore`] has the
//! same semantics without durability.

pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod memory;
pub mod pool;
pub mod reload;
pub mod repository;
pub mod scheduler;
pub mod schema;
pub mod store;

pub use config::{
	load_config, load_config_from, ConfigError, ConfigSource, DefaultsSource, EnvSource, JobsConfig,
	JobsConfigLayer, Precedence, SchedulerConfig, TomlSource,
};
pub use error::{JobError, Result};
pub use events::{JobEvents, NoopJobEvents};
pub use handler::{handler_fn, FnHandler, HandlerError, JobHandler, JobOutcome};
pub use memory::MemoryJobStore;
pub use pool::{create_pool, create_pool_at};
pub use reload::ReloadLock;
pub use repository::SqliteJobStore;
pub use scheduler::{JobScheduler, JobSchedulerBuilder};
pub use schema::run_migrations;
pub use store::JobStore;

pub use loom_jobs_core::{
	BackoffPolicy, EnqueueJob, JobId, JobListFilter, JobRecord, JobStatus, JobStatusCounts,
	JobsError,
};
