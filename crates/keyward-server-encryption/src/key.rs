// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolved encryption keys.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cipher::KEY_SIZE;
use crate::error::EncryptionResult;
use crate::provider::{EncryptionProvider, HsmKeyHandle};
use crate::types::EncryptedValue;

/// Key material as each provider type understands it.
#[derive(Clone)]
pub enum KeyMaterial {
	/// Software AES-256 key held in process memory.
	Aes256(Zeroizing<[u8; KEY_SIZE]>),
	/// Key resident in an HSM partition, referenced by handle.
	Hsm { alias: String, handle: HsmKeyHandle },
	/// Key held by an external KMS, referenced by name.
	Named(String),
}

impl fmt::Debug for KeyMaterial {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KeyMaterial::Aes256(_) => f.debug_tuple("Aes256").field(&"[REDACTED]").finish(),
			KeyMaterial::Hsm { alias, .. } => f.debug_struct("Hsm").field("alias", alias).finish(),
			KeyMaterial::Named(name) => f.debug_tuple("Named").field(name).finish(),
		}
	}
}

/// A key bound to the canary uuid that identifies it.
///
/// Created by the canary mapper and owned by the key set.
#[derive(Clone)]
pub struct EncryptionKey {
	uuid: Uuid,
	provider: Arc<dyn EncryptionProvider>,
	material: KeyMaterial,
	key_name: Option<String>,
}

impl EncryptionKey {
	pub fn new(
		uuid: Uuid,
		provider: Arc<dyn EncryptionProvider>,
		material: KeyMaterial,
		key_name: Option<String>,
	) -> Self {
		Self {
			uuid,
			provider,
			material,
			key_name,
		}
	}

	pub fn uuid(&self) -> Uuid {
		self.uuid
	}

	pub fn provider(&self) -> &Arc<dyn EncryptionProvider> {
		&self.provider
	}

	pub fn material(&self) -> &KeyMaterial {
		&self.material
	}

	pub fn key_name(&self) -> Option<&str> {
		self.key_name.as_deref()
	}

	pub async fn encrypt(&self, plaintext: &[u8]) -> EncryptionResult<EncryptedValue> {
		let sealed = self.provider.encrypt(&self.material, plaintext).await?;
		Ok(EncryptedValue {
			canary_uuid: self.uuid,
			encrypted_value: sealed.ciphertext,
			nonce: sealed.nonce,
		})
	}

	pub async fn decrypt(
		&self,
		ciphertext: &[u8],
		nonce: &[u8],
	) -> EncryptionResult<Zeroizing<Vec<u8>>> {
		self.provider.decrypt(&self.material, ciphertext, nonce).await
	}
}

impl fmt::Debug for EncryptionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EncryptionKey")
			.field("uuid", &self.uuid)
			.field("provider", &self.provider.name())
			.field("material", &self.material)
			.field("key_name", &self.key_name)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cipher::generate_key;
	use crate::provider::PasswordEncryptionService;

	#[test]
	fn debug_does_not_leak_key_bytes() {
		let raw = generate_key();
		let hex_key = hex::encode(raw.as_slice());
		let key = EncryptionKey::new(
			Uuid::new_v4(),
			Arc::new(PasswordEncryptionService::new("internal", 1)),
			KeyMaterial::Aes256(raw),
			None,
		);

		let rendered = format!("{key:?}");
		assert!(rendered.contains("[REDACTED]"));
		assert!(!rendered.contains(&hex_key));
	}

	#[tokio::test]
	async fn encrypted_value_carries_key_uuid() {
		let uuid = Uuid::new_v4();
		let key = EncryptionKey::new(
			uuid,
			Arc::new(PasswordEncryptionService::new("internal", 1)),
			KeyMaterial::Aes256(generate_key()),
			None,
		);

		let value = key.encrypt(b"secret").await.unwrap();
		assert_eq!(value.canary_uuid, uuid);

		let plaintext = key.decrypt(&value.encrypted_value, &value.nonce).await.unwrap();
		assert_eq!(plaintext.as_slice(), b"secret");
	}
}
