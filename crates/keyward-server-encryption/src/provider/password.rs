// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use tracing::debug;
use zeroize::Zeroizing;

use super::{wrong_material, EncryptionProvider};
use crate::cipher::{self, Sealed};
use crate::config::{KeyDescriptor, ProviderType};
use crate::error::{EncryptionError, EncryptionResult};
use crate::key::KeyMaterial;
use crate::key_proxy::{KeyProxy, PasswordKeyProxy};

/// The `internal` provider: AES-256-GCM with keys derived from configured passwords.
#[derive(Debug)]
pub struct PasswordEncryptionService {
	name: String,
	iterations: u32,
}

impl PasswordEncryptionService {
	pub fn new(name: impl Into<String>, iterations: u32) -> Self {
		Self {
			name: name.into(),
			iterations,
		}
	}
}

#[async_trait]
impl EncryptionProvider for PasswordEncryptionService {
	fn name(&self) -> &str {
		&self.name
	}

	fn provider_type(&self) -> ProviderType {
		ProviderType::Internal
	}

	async fn encrypt(&self, key: &KeyMaterial, plaintext: &[u8]) -> EncryptionResult<Sealed> {
		match key {
			KeyMaterial::Aes256(key) => cipher::seal(key, plaintext),
			other => Err(wrong_material(ProviderType::Internal, other)),
		}
	}

	async fn decrypt(
		&self,
		key: &KeyMaterial,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		match key {
			KeyMaterial::Aes256(key) => cipher::open(key, ciphertext, nonce),
			other => Err(wrong_material(ProviderType::Internal, other)),
		}
	}

	fn create_key_proxy(&self, descriptor: &KeyDescriptor) -> EncryptionResult<Box<dyn KeyProxy>> {
		let password = descriptor.encryption_password.clone().ok_or_else(|| {
			EncryptionError::Configuration(format!(
				"provider '{}': key has no encryption_password",
				self.name
			))
		})?;
		Ok(Box::new(PasswordKeyProxy::new(password, self.iterations)))
	}

	async fn reconnect(&self, cause: &EncryptionError) -> EncryptionResult<()> {
		// In-process keys have no connection to restore.
		debug!(provider = %self.name, error = %cause, "reconnect requested for internal provider");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cipher::generate_key;

	#[tokio::test]
	async fn encrypts_with_software_key() {
		let service = PasswordEncryptionService::new("internal", 1);
		let key = KeyMaterial::Aes256(generate_key());

		let sealed = service.encrypt(&key, b"value").await.unwrap();
		let plaintext = service
			.decrypt(&key, &sealed.ciphertext, &sealed.nonce)
			.await
			.unwrap();
		assert_eq!(plaintext.as_slice(), b"value");
	}

	#[tokio::test]
	async fn rejects_foreign_key_material() {
		let service = PasswordEncryptionService::new("internal", 1);
		let err = service
			.encrypt(&KeyMaterial::Named("kms-key".into()), b"value")
			.await
			.unwrap_err();
		assert!(matches!(err, EncryptionError::InvalidKeyMaterial(_)));
	}

	#[test]
	fn key_proxy_requires_password() {
		let service = PasswordEncryptionService::new("internal", 1);
		assert!(service
			.create_key_proxy(&KeyDescriptor::named("label", true))
			.is_err());
		assert!(service
			.create_key_proxy(&KeyDescriptor::password("pw", true))
			.is_ok());
	}

	#[tokio::test]
	async fn reconnect_is_a_no_op() {
		let service = PasswordEncryptionService::new("internal", 1);
		service
			.reconnect(&EncryptionError::AuthenticationFailed)
			.await
			.unwrap();
	}
}
