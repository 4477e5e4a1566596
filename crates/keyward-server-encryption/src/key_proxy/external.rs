// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::KeyProxy;
use crate::canary::{classify, CanaryVerdict, EncryptionKeyCanary};
use crate::error::EncryptionResult;
use crate::key::KeyMaterial;
use crate::provider::KmsClient;

/// Proxy for a key held by an external KMS and addressed by name.
pub struct ExternalKeyProxy {
	client: Arc<dyn KmsClient>,
	key_name: String,
}

impl ExternalKeyProxy {
	pub fn new(client: Arc<dyn KmsClient>, key_name: String) -> Self {
		Self { client, key_name }
	}
}

#[async_trait]
impl KeyProxy for ExternalKeyProxy {
	async fn key(&mut self) -> EncryptionResult<KeyMaterial> {
		Ok(KeyMaterial::Named(self.key_name.clone()))
	}

	async fn matches_canary(&mut self, canary: &EncryptionKeyCanary) -> CanaryVerdict {
		classify(
			self.client
				.decrypt(&self.key_name, &canary.encrypted_canary_value, &canary.nonce)
				.await,
		)
	}

	fn salt(&self) -> Option<&[u8]> {
		None
	}
}

impl fmt::Debug for ExternalKeyProxy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExternalKeyProxy")
			.field("key_name", &self.key_name)
			.finish_non_exhaustive()
	}
}
