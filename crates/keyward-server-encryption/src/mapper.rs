// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Binds configured keys to persisted canaries.
//!
//! Every configured key descriptor gets a [`KeyProxy`]. Each persisted canary
//! is offered to the proxies that are still unbound; the first match binds the
//! canary uuid to that key. The active descriptor must end up bound: either a
//! canary already exists for it, this instance creates one, or another
//! instance creates one while this instance polls.
//!
//! Inactive descriptors that match no canary are left out of the key set.
//! Ciphertext can only exist for keys that were active at some point, and
//! every active key got a canary, so such a descriptor has nothing to decrypt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::canary::{CanaryVerdict, EncryptionKeyCanary, CANARY_VALUE};
use crate::config::{active_key_count, EncryptionConfig, ProviderConfig};
use crate::error::{EncryptionError, EncryptionResult};
use crate::factory::EncryptionProviderFactory;
use crate::key::EncryptionKey;
use crate::key_proxy::KeyProxy;
use crate::key_set::{EncryptionKeySet, KeySetLoader};
use crate::provider::EncryptionProvider;
use crate::store::CanaryStore;
use crate::timed_retry::TimedRetry;

/// One configured key descriptor during a mapping run.
struct Candidate {
	label: String,
	provider: Arc<dyn EncryptionProvider>,
	proxy: Box<dyn KeyProxy>,
	key_name: Option<String>,
	active: bool,
	bound: Option<Uuid>,
}

pub struct EncryptionKeyCanaryMapper {
	providers: Vec<ProviderConfig>,
	key_creation_enabled: bool,
	canary_wait_timeout: Duration,
	canaries: Arc<dyn CanaryStore>,
	factory: Arc<EncryptionProviderFactory>,
	retry: TimedRetry,
}

impl EncryptionKeyCanaryMapper {
	pub fn new(
		config: &EncryptionConfig,
		canaries: Arc<dyn CanaryStore>,
		factory: Arc<EncryptionProviderFactory>,
	) -> Self {
		Self {
			providers: config.providers.clone(),
			key_creation_enabled: config.key_creation_enabled,
			canary_wait_timeout: config.canary_wait_timeout,
			canaries,
			factory,
			retry: TimedRetry::every_second(),
		}
	}

	pub fn with_retry(mut self, retry: TimedRetry) -> Self {
		self.retry = retry;
		self
	}

	/// Populate `key_set` with one key per matched canary and mark the active one.
	#[instrument(skip_all, fields(providers = self.providers.len()))]
	pub async fn map_uuids_to_keys(&self, key_set: &mut EncryptionKeySet) -> EncryptionResult<()> {
		match active_key_count(&self.providers) {
			0 => return Err(EncryptionError::NoActiveKey),
			1 => {}
			n => return Err(EncryptionError::MultipleActiveKeys(n)),
		}

		let mut candidates = self.candidates().await?;

		let canaries = self.canaries.find_all().await?;
		debug!(canaries = canaries.len(), "loaded persisted canaries");
		self.bind_canaries(&canaries, &mut candidates, key_set, false)
			.await?;

		if key_set.active_uuid().is_none() {
			if self.key_creation_enabled {
				self.create_active_canary(&mut candidates, key_set).await?;
			} else {
				self.wait_for_active_canary(&mut candidates, key_set)
					.await?;
			}
		}

		for candidate in candidates.iter().filter(|c| c.bound.is_none()) {
			warn!(
				key = %candidate.label,
				"configured encryption key matches no canary and will not be loaded"
			);
		}

		let active = key_set.active()?.uuid();
		info!(
			keys = key_set.len(),
			active = %active,
			"encryption keys mapped to canaries"
		);
		Ok(())
	}

	/// Remove canaries of keys that no longer protect any value.
	#[instrument(skip(self), fields(count = uuids.len()))]
	pub async fn delete(&self, uuids: &[Uuid]) -> EncryptionResult<u64> {
		let deleted = self.canaries.delete(uuids).await?;
		info!(deleted, "deleted encryption key canaries");
		Ok(deleted)
	}

	async fn candidates(&self) -> EncryptionResult<Vec<Candidate>> {
		let mut candidates = Vec::new();
		for provider in &self.providers {
			let service = self.factory.get_encryption_service(provider).await?;
			for (index, descriptor) in provider.keys.iter().enumerate() {
				candidates.push(Candidate {
					label: format!("{}[{index}]", provider.name),
					provider: Arc::clone(&service),
					proxy: service.create_key_proxy(descriptor)?,
					key_name: descriptor.encryption_key_name.clone(),
					active: descriptor.active,
					bound: None,
				});
			}
		}
		Ok(candidates)
	}

	async fn bind_canaries(
		&self,
		canaries: &[EncryptionKeyCanary],
		candidates: &mut [Candidate],
		key_set: &mut EncryptionKeySet,
		active_only: bool,
	) -> EncryptionResult<()> {
		for canary in canaries {
			if key_set.contains(&canary.uuid) {
				continue;
			}

			let mut matched = false;
			for candidate in candidates
				.iter_mut()
				.filter(|c| c.bound.is_none() && (c.active || !active_only))
			{
				match candidate.proxy.matches_canary(canary).await {
					CanaryVerdict::Match => {
						bind(candidate, canary.uuid, key_set).await?;
						matched = true;
						break;
					}
					CanaryVerdict::NoMatch => {}
					CanaryVerdict::Fault(err) => return Err(err),
				}
			}

			if !matched {
				debug!(canary = %canary.uuid, "canary matches no configured key");
			}
		}
		Ok(())
	}

	#[instrument(skip_all)]
	async fn create_active_canary(
		&self,
		candidates: &mut [Candidate],
		key_set: &mut EncryptionKeySet,
	) -> EncryptionResult<()> {
		let candidate = candidates
			.iter_mut()
			.find(|c| c.active)
			.ok_or(EncryptionError::NoActiveKey)?;

		let material = candidate.proxy.key().await?;
		let sealed = candidate.provider.encrypt(&material, CANARY_VALUE).await?;
		let canary = EncryptionKeyCanary {
			uuid: Uuid::new_v4(),
			encrypted_canary_value: sealed.ciphertext,
			nonce: sealed.nonce,
			salt: candidate.proxy.salt().map(<[u8]>::to_vec),
		};
		self.canaries.save(&canary).await?;
		info!(canary = %canary.uuid, key = %candidate.label, "created canary for active key");

		bind(candidate, canary.uuid, key_set).await
	}

	#[instrument(skip_all, fields(timeout_secs = self.canary_wait_timeout.as_secs()))]
	async fn wait_for_active_canary(
		&self,
		candidates: &mut [Candidate],
		key_set: &mut EncryptionKeySet,
	) -> EncryptionResult<()> {
		info!("key creation disabled, waiting for the active key canary");
		let mut attempts = self.retry.attempts(self.canary_wait_timeout);
		while attempts.next().await {
			let canaries = self.canaries.find_all().await?;
			self.bind_canaries(&canaries, candidates, key_set, true)
				.await?;
			if key_set.active_uuid().is_some() {
				return Ok(());
			}
		}
		Err(EncryptionError::CanaryTimeout {
			waited: self.canary_wait_timeout,
		})
	}
}

async fn bind(
	candidate: &mut Candidate,
	uuid: Uuid,
	key_set: &mut EncryptionKeySet,
) -> EncryptionResult<()> {
	let material = candidate.proxy.key().await?;
	key_set.add(EncryptionKey::new(
		uuid,
		Arc::clone(&candidate.provider),
		material,
		candidate.key_name.clone(),
	));
	if candidate.active {
		key_set.set_active(uuid)?;
	}
	candidate.bound = Some(uuid);
	debug!(canary = %uuid, key = %candidate.label, active = candidate.active, "bound key to canary");
	Ok(())
}

#[async_trait]
impl KeySetLoader for EncryptionKeyCanaryMapper {
	async fn load(&self, key_set: &mut EncryptionKeySet) -> EncryptionResult<()> {
		self.map_uuids_to_keys(key_set).await
	}
}
