// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_server_jobs::{
	handler_fn, BackoffPolicy, EnqueueJob, HandlerError, JobOutcome, JobScheduler, JobStatus,
	JobStore, SchedulerConfig, SqliteJobStore,
};

fn fast_config() -> SchedulerConfig {
	SchedulerConfig {
		poll_interval: Duration::from_millis(20),
		backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(40)),
		prune_interval: Duration::from_secs(3_600),
		prune_age: Duration::from_secs(86_400),
		handler_timeout: Some(Duration::from_secs(5)),
	}
}

async fn wait_for_status(store: &dyn JobStore, id: loom_server_jobs::JobId, status: JobStatus) {
	tokio::time::timeout(Duration::from_secs(10), async {
		loop {
			if let Some(job) = store.get(id).await.unwrap() {
				if job.status == status {
					return;
				}
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("job never reached expected status");
}

#[tokio::test]
async fn test_payload_survives_reopen() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("jobs.db");

	let store = SqliteJobStore::open_path(&path).await.unwrap();
	let job = store
		.enqueue(EnqueueJob::new("persist").with_payload(serde_json::json!({ "key": "value" })))
		.await
		.unwrap();
	store.close().await;

	let reopened = SqliteJobStore::open_path(&path).await.unwrap();
	let fetched = reopened.get(job.id).await.unwrap().unwrap();
	assert_eq!(fetched.payload, serde_json::json!({ "key": "value" }));
	assert_eq!(fetched, job);
}

#[tokio::test]
async fn test_running_job_recovered_after_restart() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("jobs.db");

	let store = SqliteJobStore::open_path(&path).await.unwrap();
	let job = store.enqueue(EnqueueJob::new("email.send")).await.unwrap();
	store.claim_next().await.unwrap().unwrap();
	store.close().await;

	let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open_path(&path).await.unwrap());
	let scheduler = JobScheduler::new(Arc::clone(&store), fast_config());
	scheduler.register_handler(
		"email.send",
		handler_fn(|_job| async { Ok::<_, HandlerError>(JobOutcome::Success) }),
	);

	scheduler.start().await.unwrap();
	wait_for_status(store.as_ref(), job.id, JobStatus::Completed).await;
	scheduler.stop().await;

	let done = store.get(job.id).await.unwrap().unwrap();
	assert_eq!(done.attempts, 2);
}

#[tokio::test]
async fn test_retries_until_success() {
	let dir = tempfile::tempdir().unwrap();
	let store: Arc<dyn JobStore> =
		Arc::new(SqliteJobStore::open_path(&dir.path().join("jobs.db")).await.unwrap());
	let scheduler = JobScheduler::new(Arc::clone(&store), fast_config());

	let calls = Arc::new(AtomicU32::new(0));
	let counter = calls.clone();
	scheduler.register_handler(
		"flaky",
		handler_fn(move |_job| {
			let counter = counter.clone();
			async move {
				if counter.fetch_add(1, Ordering::SeqCst) < 2 {
					return Ok::<_, HandlerError>(JobOutcome::failure("not yet"));
				}
				Ok(JobOutcome::Success)
			}
		}),
	);

	let job = store
		.enqueue(EnqueueJob::new("flaky").with_max_attempts(5))
		.await
		.unwrap();
	scheduler.start().await.unwrap();
	wait_for_status(store.as_ref(), job.id, JobStatus::Completed).await;
	scheduler.stop().await;

	let done = store.get(job.id).await.unwrap().unwrap();
	assert_eq!(done.attempts, 3);
	assert_eq!(done.last_error.as_deref(), Some("not yet"));
	assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failing_job_ends_dead() {
	let dir = tempfile::tempdir().unwrap();
	let store: Arc<dyn JobStore> =
		Arc::new(SqliteJobStore::open_path(&dir.path().join("jobs.db")).await.unwrap());
	let scheduler = JobScheduler::new(Arc::clone(&store), fast_config());
	scheduler.register_handler(
		"doomed",
		handler_fn(|_job| async { Err::<JobOutcome, HandlerError>("upstream unavailable".into()) }),
	);

	let job = store.enqueue(EnqueueJob::new("doomed")).await.unwrap();
	scheduler.start().await.unwrap();
	wait_for_status(store.as_ref(), job.id, JobStatus::Dead).await;
	scheduler.stop().await;

	let dead = store.get(job.id).await.unwrap().unwrap();
	assert_eq!(dead.attempts, dead.max_attempts);
	assert_eq!(dead.last_error.as_deref(), Some("upstream unavailable"));
	assert!(store.claim_next().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_schedulers_sharing_a_store_run_each_job_once() {
	let dir = tempfile::tempdir().unwrap();
	let store: Arc<dyn JobStore> =
		Arc::new(SqliteJobStore::open_path(&dir.path().join("jobs.db")).await.unwrap());

	let calls = Arc::new(AtomicU32::new(0));
	let mut schedulers = Vec::new();
	for _ in 0..3 {
		let scheduler = JobScheduler::new(Arc::clone(&store), fast_config());
		let counter = calls.clone();
		scheduler.register_handler(
			"work",
			handler_fn(move |_job| {
				let counter = counter.clone();
				async move {
					counter.fetch_add(1, Ordering::SeqCst);
					Ok::<_, HandlerError>(JobOutcome::Success)
				}
			}),
		);
		schedulers.push(scheduler);
	}

	for _ in 0..15 {
		store.enqueue(EnqueueJob::new("work")).await.unwrap();
	}
	for scheduler in &schedulers {
		scheduler.start().await.unwrap();
	}

	tokio::time::timeout(Duration::from_secs(10), async {
		while store.count_by_status().await.unwrap().completed < 15 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("jobs were not all completed");

	for scheduler in &schedulers {
		scheduler.stop().await;
	}
	assert_eq!(calls.load(Ordering::SeqCst), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_scheduler_start_keeps_in_flight_claim() {
	let dir = tempfile::tempdir().unwrap();
	let store: Arc<dyn JobStore> =
		Arc::new(SqliteJobStore::open_path(&dir.path().join("jobs.db")).await.unwrap());

	let calls = Arc::new(AtomicU32::new(0));
	let started = Arc::new(tokio::sync::Notify::new());
	let slow_handler = {
		let calls = calls.clone();
		let started = started.clone();
		handler_fn(move |_job| {
			let calls = calls.clone();
			let started = started.clone();
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				started.notify_one();
				tokio::time::sleep(Duration::from_millis(200)).await;
				Ok::<_, HandlerError>(JobOutcome::Success)
			}
		})
	};

	let first = JobScheduler::new(Arc::clone(&store), fast_config());
	first.register_handler("slow", slow_handler.clone());
	let second = JobScheduler::new(Arc::clone(&store), fast_config());
	second.register_handler("slow", slow_handler);

	let job = store.enqueue(EnqueueJob::new("slow")).await.unwrap();
	first.start().await.unwrap();
	started.notified().await;

	second.start().await.unwrap();
	let claimed = store.get(job.id).await.unwrap().unwrap();
	assert_eq!(claimed.status, JobStatus::Running);

	wait_for_status(store.as_ref(), job.id, JobStatus::Completed).await;
	// Give the second scheduler a few poll intervals to pick up a stray claim.
	tokio::time::sleep(Duration::from_millis(100)).await;
	first.stop().await;
	second.stop().await;

	let done = store.get(job.id).await.unwrap().unwrap();
	assert_eq!(done.attempts, 1);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
