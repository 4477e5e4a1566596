// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encryption services, one per configured key provider.
//!
//! Each service performs encrypt/decrypt with key material of its own kind,
//! builds a [`KeyProxy`] for each configured key, and knows how to
//! re-establish its connection after a fault:
//! - [`PasswordEncryptionService`] - software AES keys derived from passwords
//! - [`HsmEncryptionService`] - keys resident in a hardware security module
//! - [`KmsPluginEncryptionService`] - keys held by an external KMS plugin

mod hsm;
mod kms;
mod password;

pub use hsm::{HsmClient, HsmConnector, HsmEncryptionService, HsmKeyHandle};
pub use kms::{KmsClient, KmsConnector, KmsPluginEncryptionService};
pub use password::PasswordEncryptionService;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::cipher::Sealed;
use crate::config::{KeyDescriptor, ProviderType};
use crate::error::{EncryptionError, EncryptionResult};
use crate::key::KeyMaterial;
use crate::key_proxy::KeyProxy;

#[async_trait]
pub trait EncryptionProvider: Send + Sync {
	/// Configured provider name, used in logs.
	fn name(&self) -> &str;

	fn provider_type(&self) -> ProviderType;

	async fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> EncryptionResult<Sealed>;

	async fn decrypt(
		&self,
		key: &KeyMaterial,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>>;

	fn create_key_proxy(&self, descriptor: &KeyDescriptor) -> EncryptionResult<Box<dyn KeyProxy>>;

	/// Re-establish the connection to the key source after `cause`.
	async fn reconnect(&self, cause: &EncryptionError) -> EncryptionResult<()>;
}

pub(crate) fn wrong_material(provider: ProviderType, key: &KeyMaterial) -> EncryptionError {
	EncryptionError::InvalidKeyMaterial(format!("{provider} provider cannot use {key:?}"))
}
