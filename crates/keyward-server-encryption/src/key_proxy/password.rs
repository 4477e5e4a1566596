// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use async_trait::async_trait;
use keyward_common_secret::SecretString;
use zeroize::Zeroizing;

use super::KeyProxy;
use crate::canary::{classify, CanaryVerdict, EncryptionKeyCanary};
use crate::cipher::{self, KEY_SIZE};
use crate::error::{EncryptionError, EncryptionResult};
use crate::key::KeyMaterial;

/// Proxy for a key derived from a configured password.
///
/// Without a matching canary the key is derived under a fresh salt. A canary
/// match replaces the key and salt with the ones recovered from the canary.
pub struct PasswordKeyProxy {
	password: SecretString,
	iterations: u32,
	key: Option<Zeroizing<[u8; KEY_SIZE]>>,
	salt: Option<Vec<u8>>,
}

impl PasswordKeyProxy {
	pub fn new(password: SecretString, iterations: u32) -> Self {
		Self {
			password,
			iterations,
			key: None,
			salt: None,
		}
	}

	pub fn derive_key(&self, salt: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
		cipher::derive_key(&self.password, salt, self.iterations)
	}

	pub fn generate_salt(&self) -> Vec<u8> {
		cipher::generate_salt()
	}

	/// Runs PBKDF2 on the blocking pool.
	async fn derive_key_blocking(&self, salt: Vec<u8>) -> EncryptionResult<Zeroizing<[u8; KEY_SIZE]>> {
		let password = self.password.clone();
		let iterations = self.iterations;
		tokio::task::spawn_blocking(move || cipher::derive_key(&password, &salt, iterations))
			.await
			.map_err(|e| EncryptionError::Internal(format!("key derivation task failed: {e}")))
	}
}

#[async_trait]
impl KeyProxy for PasswordKeyProxy {
	async fn key(&mut self) -> EncryptionResult<KeyMaterial> {
		if let Some(key) = &self.key {
			return Ok(KeyMaterial::Aes256(key.clone()));
		}

		let salt = self.generate_salt();
		let key = self.derive_key_blocking(salt.clone()).await?;
		self.key = Some(key.clone());
		self.salt = Some(salt);
		Ok(KeyMaterial::Aes256(key))
	}

	async fn matches_canary(&mut self, canary: &EncryptionKeyCanary) -> CanaryVerdict {
		let Some(salt) = canary.salt() else {
			return CanaryVerdict::NoMatch;
		};

		let candidate = match self.derive_key_blocking(salt.to_vec()).await {
			Ok(key) => key,
			Err(err) => return CanaryVerdict::Fault(err),
		};
		let verdict = classify(cipher::open(
			&candidate,
			&canary.encrypted_canary_value,
			&canary.nonce,
		));

		if verdict.is_match() {
			self.key = Some(candidate);
			self.salt = Some(salt.to_vec());
		}
		verdict
	}

	fn salt(&self) -> Option<&[u8]> {
		self.salt.as_deref()
	}
}

impl fmt::Debug for PasswordKeyProxy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PasswordKeyProxy")
			.field("password", &self.password)
			.field("iterations", &self.iterations)
			.field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}
