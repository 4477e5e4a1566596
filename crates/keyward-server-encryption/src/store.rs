// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage contracts for canaries and encrypted values.
//!
//! The in-memory implementations back single-process deployments and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::canary::EncryptionKeyCanary;
use crate::error::EncryptionResult;
use crate::retrying::RetryingEncryptionService;
use crate::types::{EncryptedValue, StoredEncryptedValue};

#[async_trait]
pub trait CanaryStore: Send + Sync {
	async fn find_all(&self) -> EncryptionResult<Vec<EncryptionKeyCanary>>;

	async fn save(&self, canary: &EncryptionKeyCanary) -> EncryptionResult<()>;

	/// Delete the canaries with the given uuids, returning how many existed.
	async fn delete(&self, uuids: &[Uuid]) -> EncryptionResult<u64>;
}

#[async_trait]
pub trait EncryptedValueStore: Send + Sync {
	/// Up to `limit` values encrypted under any of `canary_uuids`.
	async fn find_by_canary_uuids(
		&self,
		canary_uuids: &[Uuid],
		limit: usize,
	) -> EncryptionResult<Vec<StoredEncryptedValue>>;

	/// Re-encrypt one value under the active key, replacing ciphertext, nonce
	/// and key uuid in a single write.
	async fn rotate(&self, value: &StoredEncryptedValue) -> EncryptionResult<()>;

	async fn count_by_canary_uuid(&self) -> EncryptionResult<HashMap<Uuid, u64>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCanaryStore {
	canaries: Mutex<Vec<EncryptionKeyCanary>>,
}

impl InMemoryCanaryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.canaries.lock().await.len()
	}
}

#[async_trait]
impl CanaryStore for InMemoryCanaryStore {
	async fn find_all(&self) -> EncryptionResult<Vec<EncryptionKeyCanary>> {
		Ok(self.canaries.lock().await.clone())
	}

	async fn save(&self, canary: &EncryptionKeyCanary) -> EncryptionResult<()> {
		self.canaries.lock().await.push(canary.clone());
		Ok(())
	}

	async fn delete(&self, uuids: &[Uuid]) -> EncryptionResult<u64> {
		let mut canaries = self.canaries.lock().await;
		let before = canaries.len();
		canaries.retain(|canary| !uuids.contains(&canary.uuid));
		Ok((before - canaries.len()) as u64)
	}
}

/// Encrypted values held in memory and rotated through the retrying service.
pub struct InMemoryEncryptedValueStore {
	values: Mutex<BTreeMap<Uuid, EncryptedValue>>,
	encryption: Arc<RetryingEncryptionService>,
	rotations: AtomicUsize,
}

impl InMemoryEncryptedValueStore {
	pub fn new(encryption: Arc<RetryingEncryptionService>) -> Self {
		Self {
			values: Mutex::new(BTreeMap::new()),
			encryption,
			rotations: AtomicUsize::new(0),
		}
	}

	pub async fn insert(&self, value: EncryptedValue) -> Uuid {
		let uuid = Uuid::new_v4();
		self.values.lock().await.insert(uuid, value);
		uuid
	}

	pub async fn get(&self, uuid: &Uuid) -> Option<EncryptedValue> {
		self.values.lock().await.get(uuid).cloned()
	}

	/// Number of successful `rotate` calls.
	pub fn rotations(&self) -> usize {
		self.rotations.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl EncryptedValueStore for InMemoryEncryptedValueStore {
	async fn find_by_canary_uuids(
		&self,
		canary_uuids: &[Uuid],
		limit: usize,
	) -> EncryptionResult<Vec<StoredEncryptedValue>> {
		Ok(self
			.values
			.lock()
			.await
			.iter()
			.filter(|(_, value)| canary_uuids.contains(&value.canary_uuid))
			.take(limit)
			.map(|(uuid, value)| StoredEncryptedValue {
				uuid: *uuid,
				value: value.clone(),
			})
			.collect())
	}

	async fn rotate(&self, stored: &StoredEncryptedValue) -> EncryptionResult<()> {
		let plaintext = self.encryption.decrypt(&stored.value).await?;
		let rotated = self.encryption.encrypt(&plaintext).await?;

		let mut values = self.values.lock().await;
		if let Some(slot) = values.get_mut(&stored.uuid) {
			*slot = rotated;
		}
		self.rotations.fetch_add(1, Ordering::SeqCst);
		debug!(value = %stored.uuid, "rotated encrypted value");
		Ok(())
	}

	async fn count_by_canary_uuid(&self) -> EncryptionResult<HashMap<Uuid, u64>> {
		let mut counts = HashMap::new();
		for value in self.values.lock().await.values() {
			*counts.entry(value.canary_uuid).or_insert(0) += 1;
		}
		Ok(counts)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn canary() -> EncryptionKeyCanary {
		EncryptionKeyCanary {
			uuid: Uuid::new_v4(),
			encrypted_canary_value: vec![1, 2, 3],
			nonce: vec![4, 5, 6],
			salt: None,
		}
	}

	#[tokio::test]
	async fn canaries_are_saved_and_deleted_by_uuid() {
		let store = InMemoryCanaryStore::new();
		let keep = canary();
		let gone = canary();
		store.save(&keep).await.unwrap();
		store.save(&gone).await.unwrap();

		let deleted = store.delete(&[gone.uuid, Uuid::new_v4()]).await.unwrap();

		assert_eq!(deleted, 1);
		assert_eq!(store.find_all().await.unwrap(), vec![keep]);
	}
}
