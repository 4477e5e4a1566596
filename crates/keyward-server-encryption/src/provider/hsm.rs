// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use super::{wrong_material, EncryptionProvider};
use crate::cipher::Sealed;
use crate::config::{KeyDescriptor, ProviderConfig, ProviderType};
use crate::error::{EncryptionError, EncryptionResult};
use crate::key::KeyMaterial;
use crate::key_proxy::{HsmKeyProxy, KeyProxy};
use crate::timed_retry::TimedRetry;

/// Opaque reference to a key object inside an HSM partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HsmKeyHandle(pub u64);

/// Session with an HSM partition.
///
/// Device drivers implement this; the crate ships none. Wrong-key decrypts
/// should surface the driver's native message so the canary classifier can
/// recognise it.
#[async_trait]
pub trait HsmClient: Send + Sync {
	async fn contains_alias(&self, alias: &str) -> EncryptionResult<bool>;

	async fn get_key(&self, alias: &str) -> EncryptionResult<Option<HsmKeyHandle>>;

	/// Generate a new AES-256 key inside the device.
	async fn generate_key(&self) -> EncryptionResult<HsmKeyHandle>;

	async fn set_key_entry(&self, alias: &str, key: HsmKeyHandle) -> EncryptionResult<()>;

	async fn encrypt(&self, key: HsmKeyHandle, plaintext: &[u8]) -> EncryptionResult<Sealed>;

	async fn decrypt(
		&self,
		key: HsmKeyHandle,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>>;

	/// Drop the current session and log in again.
	async fn reconnect(&self) -> EncryptionResult<()>;
}

/// Opens HSM sessions from provider configuration.
#[async_trait]
pub trait HsmConnector: Send + Sync {
	async fn connect(&self, provider: &ProviderConfig) -> EncryptionResult<Arc<dyn HsmClient>>;
}

pub struct HsmEncryptionService {
	name: String,
	client: Arc<dyn HsmClient>,
	key_creation_enabled: bool,
	key_wait_timeout: Duration,
	retry: TimedRetry,
}

impl HsmEncryptionService {
	pub fn new(
		name: impl Into<String>,
		client: Arc<dyn HsmClient>,
		key_creation_enabled: bool,
		key_wait_timeout: Duration,
	) -> Self {
		Self {
			name: name.into(),
			client,
			key_creation_enabled,
			key_wait_timeout,
			retry: TimedRetry::every_second(),
		}
	}

	pub fn with_retry(mut self, retry: TimedRetry) -> Self {
		self.retry = retry;
		self
	}
}

#[async_trait]
impl EncryptionProvider for HsmEncryptionService {
	fn name(&self) -> &str {
		&self.name
	}

	fn provider_type(&self) -> ProviderType {
		ProviderType::Hsm
	}

	async fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> EncryptionResult<Sealed> {
		match key {
			KeyMaterial::Hsm { handle, .. } => self.client.encrypt(*handle, plaintext).await,
			other => Err(wrong_material(ProviderType::Hsm, other)),
		}
	}

	async fn decrypt(
		&self,
		key: &KeyMaterial,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		match key {
			KeyMaterial::Hsm { handle, .. } => self.client.decrypt(*handle, ciphertext, nonce).await,
			other => Err(wrong_material(ProviderType::Hsm, other)),
		}
	}

	fn create_key_proxy(&self, descriptor: &KeyDescriptor) -> EncryptionResult<Box<dyn KeyProxy>> {
		let alias = descriptor.encryption_key_name.clone().ok_or_else(|| {
			EncryptionError::Configuration(format!(
				"provider '{}': HSM key has no encryption_key_name",
				self.name
			))
		})?;
		Ok(Box::new(HsmKeyProxy::new(
			Arc::clone(&self.client),
			alias,
			self.key_creation_enabled,
			self.key_wait_timeout,
			self.retry.clone(),
		)))
	}

	#[instrument(skip(self, cause), fields(provider = %self.name))]
	async fn reconnect(&self, cause: &EncryptionError) -> EncryptionResult<()> {
		warn!(error = %cause, "reconnecting to HSM after failure");
		self.client.reconnect().await?;
		info!("HSM session re-established");
		Ok(())
	}
}

impl fmt::Debug for HsmEncryptionService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HsmEncryptionService")
			.field("name", &self.name)
			.field("key_creation_enabled", &self.key_creation_enabled)
			.field("key_wait_timeout", &self.key_wait_timeout)
			.finish_non_exhaustive()
	}
}
