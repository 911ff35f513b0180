// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Critical section shared with the host's configuration reload.
///
/// Job handlers run under the read side; a reload takes the write side, so no
/// handler observes a half-applied configuration.
#[derive(Clone, Default)]
pub struct ReloadLock {
	inner: Arc<RwLock<()>>,
}

impl ReloadLock {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn in_read_lock<F, T>(&self, f: F) -> T
	where
		F: Future<Output = T>,
	{
		let _guard = self.inner.read().await;
		f.await
	}

	pub async fn in_write_lock<F, T>(&self, f: F) -> T
	where
		F: Future<Output = T>,
	{
		let _guard = self.inner.write().await;
		f.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn test_readers_share_the_lock() {
		let lock = ReloadLock::new();
		let inner = lock.clone();
		let value = lock
			.in_read_lock(async move { inner.in_read_lock(async { 7 }).await })
			.await;
		assert_eq!(value, 7);
	}

	#[tokio::test]
	async fn test_reader_waits_for_writer() {
		let lock = ReloadLock::new();
		let reloaded = Arc::new(AtomicBool::new(false));
		let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();

		let writer = {
			let lock = lock.clone();
			let reloaded = Arc::clone(&reloaded);
			tokio::spawn(async move {
				lock
					.in_write_lock(async move {
						let _ = entered_tx.send(());
						tokio::time::sleep(Duration::from_millis(50)).await;
						reloaded.store(true, Ordering::SeqCst);
					})
					.await;
			})
		};

		entered_rx.await.unwrap();
		let saw_reload = lock
			.in_read_lock(async { reloaded.load(Ordering::SeqCst) })
			.await;
		assert!(saw_reload);
		writer.await.unwrap();
	}
}
