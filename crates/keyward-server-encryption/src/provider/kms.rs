// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use super::{wrong_material, EncryptionProvider};
use crate::cipher::Sealed;
use crate::config::{KeyDescriptor, ProviderConfig, ProviderType};
use crate::error::{EncryptionError, EncryptionResult};
use crate::key::KeyMaterial;
use crate::key_proxy::{ExternalKeyProxy, KeyProxy};

/// Client for a KMS plugin that encrypts with keys it holds by name.
#[async_trait]
pub trait KmsClient: Send + Sync {
	async fn encrypt(&self, key_name: &str, plaintext: &[u8]) -> EncryptionResult<Sealed>;

	async fn decrypt(
		&self,
		key_name: &str,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>>;

	async fn reconnect(&self) -> EncryptionResult<()>;
}

#[async_trait]
pub trait KmsConnector: Send + Sync {
	async fn connect(&self, provider: &ProviderConfig) -> EncryptionResult<Arc<dyn KmsClient>>;
}

pub struct KmsPluginEncryptionService {
	name: String,
	client: Arc<dyn KmsClient>,
}

impl KmsPluginEncryptionService {
	pub fn new(name: impl Into<String>, client: Arc<dyn KmsClient>) -> Self {
		Self {
			name: name.into(),
			client,
		}
	}
}

#[async_trait]
impl EncryptionProvider for KmsPluginEncryptionService {
	fn name(&self) -> &str {
		&self.name
	}

	fn provider_type(&self) -> ProviderType {
		ProviderType::KmsPlugin
	}

	async fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> EncryptionResult<Sealed> {
		match key {
			KeyMaterial::Named(name) => self.client.encrypt(name, plaintext).await,
			other => Err(wrong_material(ProviderType::KmsPlugin, other)),
		}
	}

	async fn decrypt(
		&self,
		key: &KeyMaterial,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		match key {
			KeyMaterial::Named(name) => self.client.decrypt(name, ciphertext, nonce).await,
			other => Err(wrong_material(ProviderType::KmsPlugin, other)),
		}
	}

	fn create_key_proxy(&self, descriptor: &KeyDescriptor) -> EncryptionResult<Box<dyn KeyProxy>> {
		let key_name = descriptor.encryption_key_name.clone().ok_or_else(|| {
			EncryptionError::Configuration(format!(
				"provider '{}': KMS key has no encryption_key_name",
				self.name
			))
		})?;
		Ok(Box::new(ExternalKeyProxy::new(
			Arc::clone(&self.client),
			key_name,
		)))
	}

	#[instrument(skip(self, cause), fields(provider = %self.name))]
	async fn reconnect(&self, cause: &EncryptionError) -> EncryptionResult<()> {
		warn!(error = %cause, "reconnecting to KMS plugin after failure");
		self.client.reconnect().await?;
		info!("KMS plugin connection re-established");
		Ok(())
	}
}

impl fmt::Debug for KmsPluginEncryptionService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KmsPluginEncryptionService")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}
