// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Polling scheduler that drains a [`JobStore`] into registered handlers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use loom_jobs_core::time::{now_millis, sub_duration};
use loom_jobs_core::{JobRecord, JobStatus};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::events::{JobEvents, NoopJobEvents};
use crate::handler::{JobHandler, JobOutcome};
use crate::reload::ReloadLock;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Idle,
	Running,
	Stopped,
}

struct Workers {
	lifecycle: Lifecycle,
	handles: Vec<JoinHandle<()>>,
}

struct SchedulerInner {
	store: Arc<dyn JobStore>,
	handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
	config: SchedulerConfig,
	events: Arc<dyn JobEvents>,
	reload: ReloadLock,
	rng: std::sync::Mutex<fastrand::Rng>,
	pass: Mutex<()>,
	stopping: AtomicBool,
}

pub struct JobSchedulerBuilder {
	store: Arc<dyn JobStore>,
	config: SchedulerConfig,
	events: Arc<dyn JobEvents>,
	reload: ReloadLock,
	rng: fastrand::Rng,
}

impl JobSchedulerBuilder {
	pub fn config(mut self, config: SchedulerConfig) -> Self {
		self.config = config;
		self
	}

	pub fn events(mut self, events: Arc<dyn JobEvents>) -> Self {
		self.events = events;
		self
	}

	/// Share the host's reload critical section with job handlers.
	pub fn reload_lock(mut self, reload: ReloadLock) -> Self {
		self.reload = reload;
		self
	}

	/// Source of backoff jitter. Seed it for reproducible retry delays.
	pub fn rng(mut self, rng: fastrand::Rng) -> Self {
		self.rng = rng;
		self
	}

	pub fn build(self) -> JobScheduler {
		let (shutdown_tx, _) = broadcast::channel(1);
		JobScheduler {
			inner: Arc::new(SchedulerInner {
				store: self.store,
				handlers: RwLock::new(HashMap::new()),
				config: self.config,
				events: self.events,
				reload: self.reload,
				rng: std::sync::Mutex::new(self.rng),
				pass: Mutex::new(()),
				stopping: AtomicBool::new(false),
			}),
			shutdown_tx,
			workers: Mutex::new(Workers {
				lifecycle: Lifecycle::Idle,
				handles: Vec::new(),
			}),
		}
	}
}

/// Claims jobs one at a time and runs them through the handler registered
/// for their type.
///
/// Several schedulers may share one store; each executes at most one job at a
/// time.
pub struct JobScheduler {
	inner: Arc<SchedulerInner>,
	shutdown_tx: broadcast::Sender<()>,
	workers: Mutex<Workers>,
}

impl JobScheduler {
	pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig) -> Self {
		Self::builder(store).config(config).build()
	}

	pub fn builder(store: Arc<dyn JobStore>) -> JobSchedulerBuilder {
		JobSchedulerBuilder {
			store,
			config: SchedulerConfig::default(),
			events: Arc::new(NoopJobEvents),
			reload: ReloadLock::new(),
			rng: fastrand::Rng::new(),
		}
	}

	pub fn store(&self) -> &Arc<dyn JobStore> {
		&self.inner.store
	}

	/// Route jobs of `job_type` to `handler`, replacing any previous handler.
	pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
		let job_type = job_type.into();
		debug!(job_type = %job_type, "job handler registered");
		self.inner
			.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(job_type, handler);
	}

	pub fn unregister_handler(&self, job_type: &str) {
		let removed = self
			.inner
			.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(job_type);
		if removed.is_some() {
			debug!(job_type, "job handler unregistered");
		}
	}

	/// Recover jobs orphaned in `running` and spawn the poll and prune
	/// workers.
	///
	/// Recovery is a no-op on a store that already ran it, so starting a
	/// second scheduler on a shared store leaves the first one's claims alone.
	///
	/// Calling `start` on a running scheduler does nothing. A stopped
	/// scheduler stays stopped.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut workers = self.workers.lock().await;
		match workers.lifecycle {
			Lifecycle::Running => return Ok(()),
			Lifecycle::Stopped => {
				warn!("Job scheduler already stopped, ignoring start");
				return Ok(());
			}
			Lifecycle::Idle => {}
		}

		let recovered = self.inner.store.recover_running_jobs().await?;
		if recovered > 0 {
			info!(recovered, "Recovered jobs left running by a previous process");
		}

		let poll = tokio::spawn(poll_loop(
			Arc::clone(&self.inner),
			self.shutdown_tx.subscribe(),
		));
		let prune = tokio::spawn(prune_loop(
			Arc::clone(&self.inner),
			self.shutdown_tx.subscribe(),
		));
		workers.handles.push(poll);
		workers.handles.push(prune);
		workers.lifecycle = Lifecycle::Running;

		info!(
			poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
			prune_interval_ms = self.inner.config.prune_interval.as_millis() as u64,
			"Job scheduler started"
		);
		Ok(())
	}

	/// Signal both workers and wait for them to exit. A job already handed to
	/// its handler runs to completion first, so this can wait up to
	/// `handler_timeout` behind a stuck handler, or indefinitely when the
	/// timeout is disabled.
	#[instrument(skip(self))]
	pub async fn stop(&self) {
		let mut workers = self.workers.lock().await;
		if workers.lifecycle == Lifecycle::Stopped {
			return;
		}
		workers.lifecycle = Lifecycle::Stopped;

		self.inner.stopping.store(true, Ordering::Release);
		let _ = self.shutdown_tx.send(());

		for handle in workers.handles.drain(..) {
			if let Err(e) = handle.await {
				warn!(error = %e, "Job scheduler worker ended abnormally");
			}
		}

		info!("Job scheduler stopped");
	}

	/// Claim and execute jobs until none is claimable. Returns how many ran.
	///
	/// Returns zero without claiming if another pass is in flight.
	pub async fn run_pass(&self) -> Result<usize> {
		self.inner.run_pass().await
	}

	/// Delete terminal jobs older than the configured retention.
	pub async fn prune_expired(&self) -> Result<u64> {
		self.inner.prune_expired().await
	}
}

impl SchedulerInner {
	async fn run_pass(&self) -> Result<usize> {
		let Ok(_pass) = self.pass.try_lock() else {
			debug!("poll pass already in flight, skipping");
			return Ok(0);
		};

		let mut processed = 0;
		while !self.stopping.load(Ordering::Acquire) {
			let Some(job) = self.store.claim_next().await? else {
				break;
			};
			self.execute_job(job).await?;
			processed += 1;
		}
		Ok(processed)
	}

	fn handler(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
		self.handlers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(job_type)
			.cloned()
	}

	#[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts))]
	async fn execute_job(&self, job: JobRecord) -> Result<()> {
		let outcome = match self.handler(&job.job_type) {
			Some(handler) => self.reload.in_read_lock(self.invoke(handler, &job)).await,
			None => {
				warn!("No handler registered for job type");
				Err(format!("No handler registered for job type: {}", job.job_type))
			}
		};

		match outcome {
			Ok(()) => {
				if let Some(completed) = self.store.complete(job.id).await? {
					self.events.on_job_complete(&completed);
				}
				Ok(())
			}
			Err(message) => self.handle_failure(&job, &message).await,
		}
	}

	/// Run the handler on its own task so a panic or a hang fails only this
	/// job.
	async fn invoke(&self, handler: Arc<dyn JobHandler>, job: &JobRecord) -> std::result::Result<(), String> {
		let task_job = job.clone();
		let mut task = tokio::spawn(async move { handler.handle(&task_job).await });

		let joined = match self.config.handler_timeout {
			Some(limit) => match tokio::time::timeout(limit, &mut task).await {
				Ok(joined) => joined,
				Err(_) => {
					task.abort();
					return Err(format!("Job handler timed out after {}ms", limit.as_millis()));
				}
			},
			None => task.await,
		};

		match joined {
			Ok(Ok(JobOutcome::Success)) => Ok(()),
			Ok(Ok(JobOutcome::Failure { error })) => {
				Err(error.unwrap_or_else(|| "Handler returned failure".to_string()))
			}
			Ok(Err(e)) => Err(e.to_string()),
			Err(e) if e.is_panic() => Err(format!(
				"Job handler panicked: {}",
				panic_message(e.into_panic().as_ref())
			)),
			Err(e) => Err(format!("Job handler cancelled: {e}")),
		}
	}

	async fn handle_failure(&self, job: &JobRecord, error: &str) -> Result<()> {
		let backoff = {
			let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
			self.config.backoff.delay_with_rng(job.attempts, &mut rng)
		};

		let Some(updated) = self.store.fail(job.id, error, backoff).await? else {
			return Ok(());
		};

		if updated.status == JobStatus::Dead {
			warn!(
				job_id = %updated.id,
				job_type = %updated.job_type,
				attempts = updated.attempts,
				error,
				"Job exhausted its attempts and is dead"
			);
			self.events.on_job_dead(&updated);
		} else {
			info!(
				job_id = %updated.id,
				job_type = %updated.job_type,
				attempts = updated.attempts,
				backoff_ms = backoff.as_millis() as u64,
				error,
				"Job failed, retry scheduled"
			);
			self.events.on_job_failed(&updated, error);
		}
		Ok(())
	}

	async fn prune_expired(&self) -> Result<u64> {
		let cutoff = sub_duration(now_millis(), self.config.prune_age);
		let pruned = self.store.prune(cutoff).await?;
		if pruned > 0 {
			info!(pruned, "Pruned expired jobs");
		}
		Ok(pruned)
	}
}

async fn poll_loop(inner: Arc<SchedulerInner>, mut shutdown_rx: broadcast::Receiver<()>) {
	loop {
		if inner.stopping.load(Ordering::Acquire) {
			break;
		}

		let delay = match inner.run_pass().await {
			Ok(0) => inner.config.poll_interval,
			Ok(_) => continue,
			Err(e) => {
				error!(error = %e, "Job poll pass failed");
				inner.config.poll_interval
			}
		};

		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_rx.recv() => break,
		}
	}
	debug!("Job poll worker exited");
}

async fn prune_loop(inner: Arc<SchedulerInner>, mut shutdown_rx: broadcast::Receiver<()>) {
	// interval_at panics on a zero period.
	let period = inner.config.prune_interval.max(Duration::from_millis(1));
	let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				if let Err(e) = inner.prune_expired().await {
					error!(error = %e, "Job prune failed");
				}
			}
			_ = shutdown_rx.recv() => break,
		}
	}
	debug!("Job prune worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}
