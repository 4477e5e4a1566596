// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed-interval polling with a deadline.
//!
//! Used while waiting for another instance to create the active key canary or
//! an HSM key. Time comes from `tokio::time`, so paused-clock tests run the
//! full wait instantly.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::EncryptionResult;

#[derive(Debug, Clone)]
pub struct TimedRetry {
	interval: Duration,
}

impl Default for TimedRetry {
	fn default() -> Self {
		Self::every_second()
	}
}

impl TimedRetry {
	pub fn every_second() -> Self {
		Self::with_interval(Duration::from_secs(1))
	}

	pub fn with_interval(interval: Duration) -> Self {
		Self { interval }
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Start a bounded sequence of attempts.
	pub fn attempts(&self, timeout: Duration) -> Attempts {
		Attempts {
			interval: self.interval,
			deadline: Instant::now() + timeout,
			started: false,
		}
	}

	/// Run `op` until it reports `true`, pausing one interval between tries.
	///
	/// Returns `Ok(false)` once `timeout` has elapsed without success. Errors
	/// from `op` end the wait immediately.
	pub async fn retry_until<F, Fut>(&self, timeout: Duration, mut op: F) -> EncryptionResult<bool>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = EncryptionResult<bool>>,
	{
		let mut attempts = self.attempts(timeout);
		while attempts.next().await {
			if op().await? {
				return Ok(true);
			}
		}
		Ok(false)
	}
}

/// Gate for one attempt of a bounded retry loop.
///
/// The first call to [`Attempts::next`] returns at once; later calls sleep one
/// interval, or return `false` when the deadline has passed.
#[derive(Debug)]
pub struct Attempts {
	interval: Duration,
	deadline: Instant,
	started: bool,
}

impl Attempts {
	pub async fn next(&mut self) -> bool {
		if !self.started {
			self.started = true;
			return true;
		}
		if Instant::now() >= self.deadline {
			return false;
		}
		sleep(self.interval).await;
		true
	}
}
