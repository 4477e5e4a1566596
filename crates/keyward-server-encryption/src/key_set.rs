// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry of resolved keys and the designated active key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EncryptionError, EncryptionResult};
use crate::key::EncryptionKey;

/// Populates a key set from configuration and persisted canaries.
#[async_trait]
pub trait KeySetLoader: Send + Sync {
	async fn load(&self, key_set: &mut EncryptionKeySet) -> EncryptionResult<()>;
}

/// Keys indexed by canary uuid.
///
/// After a successful [`init`](Self::init) exactly one key is active and its
/// uuid is present in the map. Unknown uuids are never resolved to a default.
#[derive(Default)]
pub struct EncryptionKeySet {
	keys: HashMap<Uuid, EncryptionKey>,
	active: Option<Uuid>,
	loader: Option<Arc<dyn KeySetLoader>>,
}

impl EncryptionKeySet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_loader(loader: Arc<dyn KeySetLoader>) -> Self {
		Self {
			loader: Some(loader),
			..Self::default()
		}
	}

	pub fn add(&mut self, key: EncryptionKey) {
		self.keys.insert(key.uuid(), key);
	}

	pub fn set_active(&mut self, uuid: Uuid) -> EncryptionResult<()> {
		if !self.keys.contains_key(&uuid) {
			return Err(EncryptionError::KeyNotFound(uuid));
		}
		self.active = Some(uuid);
		Ok(())
	}

	pub fn get(&self, uuid: &Uuid) -> Option<&EncryptionKey> {
		self.keys.get(uuid)
	}

	pub fn contains(&self, uuid: &Uuid) -> bool {
		self.keys.contains_key(uuid)
	}

	pub fn active(&self) -> EncryptionResult<&EncryptionKey> {
		self.active
			.and_then(|uuid| self.keys.get(&uuid))
			.ok_or(EncryptionError::ActiveKeyMissing)
	}

	pub fn active_uuid(&self) -> Option<Uuid> {
		self.active
	}

	/// Uuids of every loaded key except the active one, sorted.
	pub fn inactive_uuids(&self) -> Vec<Uuid> {
		let mut uuids: Vec<Uuid> = self
			.keys
			.keys()
			.filter(|uuid| Some(**uuid) != self.active)
			.copied()
			.collect();
		uuids.sort();
		uuids
	}

	pub fn keys(&self) -> impl Iterator<Item = &EncryptionKey> {
		self.keys.values()
	}

	pub fn len(&self) -> usize {
		self.keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// First population at startup.
	pub async fn init(&mut self) -> EncryptionResult<()> {
		self.reload().await
	}

	/// Repopulate through the loader. The current keys are replaced only
	/// when the load succeeds.
	pub async fn reload(&mut self) -> EncryptionResult<()> {
		let loader = self.loader.clone().ok_or_else(|| {
			EncryptionError::Internal("encryption key set has no loader".to_string())
		})?;

		let mut fresh = EncryptionKeySet::new();
		loader.load(&mut fresh).await?;

		self.keys = fresh.keys;
		self.active = fresh.active;
		Ok(())
	}
}

impl fmt::Debug for EncryptionKeySet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EncryptionKeySet")
			.field("keys", &self.keys.len())
			.field("active", &self.active)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use crate::cipher::generate_key;
	use crate::key::KeyMaterial;
	use crate::provider::PasswordEncryptionService;

	fn key(uuid: Uuid) -> EncryptionKey {
		EncryptionKey::new(
			uuid,
			Arc::new(PasswordEncryptionService::new("internal", 1)),
			KeyMaterial::Aes256(generate_key()),
			None,
		)
	}

	struct FixedLoader {
		uuids: Vec<Uuid>,
		loads: AtomicUsize,
	}

	#[async_trait]
	impl KeySetLoader for FixedLoader {
		async fn load(&self, key_set: &mut EncryptionKeySet) -> EncryptionResult<()> {
			self.loads.fetch_add(1, Ordering::SeqCst);
			for uuid in &self.uuids {
				key_set.add(key(*uuid));
			}
			key_set.set_active(self.uuids[0])
		}
	}

	#[test]
	fn lookup_of_unknown_uuid_is_none() {
		let mut set = EncryptionKeySet::new();
		set.add(key(Uuid::new_v4()));
		assert!(set.get(&Uuid::new_v4()).is_none());
	}

	#[test]
	fn active_requires_known_uuid() {
		let mut set = EncryptionKeySet::new();
		let unknown = Uuid::new_v4();
		assert!(matches!(
			set.set_active(unknown),
			Err(EncryptionError::KeyNotFound(u)) if u == unknown
		));
		assert!(matches!(set.active(), Err(EncryptionError::ActiveKeyMissing)));
	}

	#[test]
	fn inactive_uuids_exclude_active() {
		let active = Uuid::new_v4();
		let old = Uuid::new_v4();
		let older = Uuid::new_v4();
		let mut set = EncryptionKeySet::new();
		for uuid in [active, old, older] {
			set.add(key(uuid));
		}
		set.set_active(active).unwrap();

		let mut expected = vec![old, older];
		expected.sort();
		assert_eq!(set.inactive_uuids(), expected);
		assert_eq!(set.active().unwrap().uuid(), active);
		assert_eq!(set.len(), 3);
	}

	#[tokio::test]
	async fn reload_replaces_contents_through_loader() {
		let first = Uuid::new_v4();
		let loader = Arc::new(FixedLoader {
			uuids: vec![first],
			loads: AtomicUsize::new(0),
		});
		let mut set = EncryptionKeySet::with_loader(Arc::clone(&loader) as Arc<dyn KeySetLoader>);
		let stale = Uuid::new_v4();
		set.add(key(stale));

		set.init().await.unwrap();
		assert!(!set.contains(&stale));
		assert_eq!(set.active_uuid(), Some(first));

		set.reload().await.unwrap();
		assert_eq!(set.len(), 1);
		assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
	}

	struct FailingLoader;

	#[async_trait]
	impl KeySetLoader for FailingLoader {
		async fn load(&self, key_set: &mut EncryptionKeySet) -> EncryptionResult<()> {
			key_set.add(key(Uuid::new_v4()));
			Err(EncryptionError::provider("hsm unavailable"))
		}
	}

	#[tokio::test]
	async fn failed_reload_keeps_previous_keys() {
		let active = Uuid::new_v4();
		let mut set = EncryptionKeySet::with_loader(Arc::new(FailingLoader));
		set.add(key(active));
		set.set_active(active).unwrap();

		assert!(set.reload().await.is_err());
		assert_eq!(set.len(), 1);
		assert_eq!(set.active().unwrap().uuid(), active);
	}

	#[tokio::test]
	async fn reload_without_loader_fails() {
		let mut set = EncryptionKeySet::new();
		assert!(matches!(
			set.reload().await,
			Err(EncryptionError::Internal(_))
		));
	}
}
