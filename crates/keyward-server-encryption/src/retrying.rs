// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime encrypt/decrypt with a single reconnect-and-retry on provider faults.
//!
//! Crypto calls run under the shared side of an `RwLock` around the key set.
//! A caller that sees a provider fault raises the `needs_reconnect` flag while
//! still holding the shared lock, then queues for the exclusive lock. The
//! first caller through reconnects the failing provider, reloads the key set
//! and clears the flag; callers queued behind it find the flag clear and go
//! straight to their retry. Each call retries at most once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::error::{EncryptionError, EncryptionResult};
use crate::key::EncryptionKey;
use crate::key_set::EncryptionKeySet;
use crate::provider::EncryptionProvider;
use crate::types::EncryptedValue;

/// Provider and error captured from a failed first attempt.
struct Fault {
	provider: Arc<dyn EncryptionProvider>,
	error: EncryptionError,
}

pub struct RetryingEncryptionService {
	key_set: Arc<RwLock<EncryptionKeySet>>,
	needs_reconnect: AtomicBool,
}

impl RetryingEncryptionService {
	/// Wrap an initialized key set.
	pub fn new(key_set: EncryptionKeySet) -> Self {
		Self {
			key_set: Arc::new(RwLock::new(key_set)),
			needs_reconnect: AtomicBool::new(false),
		}
	}

	/// Shared handle to the key set, for readers such as the rotator.
	pub fn key_set(&self) -> Arc<RwLock<EncryptionKeySet>> {
		Arc::clone(&self.key_set)
	}

	pub fn needs_reconnect(&self) -> bool {
		self.needs_reconnect.load(Ordering::SeqCst)
	}

	/// Encrypt under the current active key.
	pub async fn encrypt(&self, plaintext: &[u8]) -> EncryptionResult<EncryptedValue> {
		let fault = {
			let key_set = self.key_set.read().await;
			let key = key_set.active()?;
			match key.encrypt(plaintext).await {
				Ok(value) => return Ok(value),
				Err(err) => self.note_failure(key, err)?,
			}
		};

		self.reconnect_if_needed(&fault).await?;

		let key_set = self.key_set.read().await;
		key_set
			.active()?
			.encrypt(plaintext)
			.await
			.inspect_err(|err| error!(error = %err, "encrypt failed after reconnect"))
	}

	/// Decrypt with the key whose canary uuid tagged `value`.
	pub async fn decrypt(&self, value: &EncryptedValue) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		let fault = {
			let key_set = self.key_set.read().await;
			let key = lookup(&key_set, value)?;
			match key.decrypt(&value.encrypted_value, &value.nonce).await {
				Ok(plaintext) => return Ok(plaintext),
				Err(err) => self.note_failure(key, err)?,
			}
		};

		self.reconnect_if_needed(&fault).await?;

		let key_set = self.key_set.read().await;
		lookup(&key_set, value)?
			.decrypt(&value.encrypted_value, &value.nonce)
			.await
			.inspect_err(|err| {
				error!(canary = %value.canary_uuid, error = %err, "decrypt failed after reconnect")
			})
	}

	/// Must be called while the shared lock is held so the flag is raised
	/// before any exclusive holder can inspect it.
	fn note_failure(&self, key: &EncryptionKey, err: EncryptionError) -> EncryptionResult<Fault> {
		if !err.is_provider_fault() {
			return Err(err);
		}
		warn!(
			provider = key.provider().name(),
			key = %key.uuid(),
			error = %err,
			"encryption operation failed, will reconnect and retry"
		);
		self.needs_reconnect.store(true, Ordering::SeqCst);
		Ok(Fault {
			provider: Arc::clone(key.provider()),
			error: err,
		})
	}

	#[instrument(skip_all, fields(provider = fault.provider.name()))]
	async fn reconnect_if_needed(&self, fault: &Fault) -> EncryptionResult<()> {
		let mut key_set = self.key_set.write().await;
		if !self.needs_reconnect.load(Ordering::SeqCst) {
			debug!("provider already reconnected by another caller");
			return Ok(());
		}

		fault.provider.reconnect(&fault.error).await?;
		key_set.reload().await?;
		self.needs_reconnect.store(false, Ordering::SeqCst);
		info!(keys = key_set.len(), "encryption provider reconnected and key set reloaded");
		Ok(())
	}
}

fn lookup<'a>(key_set: &'a EncryptionKeySet, value: &EncryptedValue) -> EncryptionResult<&'a EncryptionKey> {
	key_set
		.get(&value.canary_uuid)
		.ok_or(EncryptionError::KeyNotFound(value.canary_uuid))
}
