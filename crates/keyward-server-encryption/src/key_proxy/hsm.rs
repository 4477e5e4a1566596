// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::KeyProxy;
use crate::canary::{classify, CanaryVerdict, EncryptionKeyCanary};
use crate::error::{EncryptionError, EncryptionResult};
use crate::key::KeyMaterial;
use crate::provider::{HsmClient, HsmKeyHandle};
use crate::timed_retry::TimedRetry;

/// Proxy for a key that lives inside an HSM under an alias.
///
/// The alias is resolved on first access. When it is missing, this instance
/// either creates the key or, if key creation is disabled, waits for another
/// instance to create it.
pub struct HsmKeyProxy {
	client: Arc<dyn HsmClient>,
	alias: String,
	key_creation_enabled: bool,
	wait_timeout: Duration,
	retry: TimedRetry,
	handle: Option<HsmKeyHandle>,
}

impl HsmKeyProxy {
	pub fn new(
		client: Arc<dyn HsmClient>,
		alias: String,
		key_creation_enabled: bool,
		wait_timeout: Duration,
		retry: TimedRetry,
	) -> Self {
		Self {
			client,
			alias,
			key_creation_enabled,
			wait_timeout,
			retry,
			handle: None,
		}
	}

	#[instrument(skip(self), fields(alias = %self.alias))]
	async fn resolve(&self) -> EncryptionResult<HsmKeyHandle> {
		if !self.client.contains_alias(&self.alias).await? {
			if self.key_creation_enabled {
				let handle = self.client.generate_key().await?;
				self.client.set_key_entry(&self.alias, handle).await?;
				info!("created HSM key");
				return Ok(handle);
			}

			debug!("HSM key missing, waiting for another instance to create it");
			let client = &self.client;
			let alias = self.alias.as_str();
			let appeared = self
				.retry
				.retry_until(self.wait_timeout, move || client.contains_alias(alias))
				.await?;
			if !appeared {
				return Err(EncryptionError::HsmKeyTimeout {
					alias: self.alias.clone(),
					waited: self.wait_timeout,
				});
			}
		}

		self.client.get_key(&self.alias).await?.ok_or_else(|| {
			EncryptionError::provider(format!("HSM alias {} has no key entry", self.alias))
		})
	}
}

#[async_trait]
impl KeyProxy for HsmKeyProxy {
	async fn key(&mut self) -> EncryptionResult<KeyMaterial> {
		let handle = match self.handle {
			Some(handle) => handle,
			None => {
				let handle = self.resolve().await?;
				self.handle = Some(handle);
				handle
			}
		};
		Ok(KeyMaterial::Hsm {
			alias: self.alias.clone(),
			handle,
		})
	}

	async fn matches_canary(&mut self, canary: &EncryptionKeyCanary) -> CanaryVerdict {
		let handle = match self.key().await {
			Ok(KeyMaterial::Hsm { handle, .. }) => handle,
			Ok(other) => {
				return CanaryVerdict::Fault(EncryptionError::InvalidKeyMaterial(format!(
					"HSM proxy resolved {other:?}"
				)))
			}
			Err(err) => return CanaryVerdict::Fault(err),
		};

		classify(
			self.client
				.decrypt(handle, &canary.encrypted_canary_value, &canary.nonce)
				.await,
		)
	}

	fn salt(&self) -> Option<&[u8]> {
		None
	}
}

impl fmt::Debug for HsmKeyProxy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HsmKeyProxy")
			.field("alias", &self.alias)
			.field("key_creation_enabled", &self.key_creation_enabled)
			.field("resolved", &self.handle.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::canary::{CANARY_VALUE, DEPRECATED_CANARY_VALUE};
	use crate::testing::FakeHsm;
	use uuid::Uuid;

	fn proxy(hsm: &Arc<FakeHsm>, creation: bool) -> HsmKeyProxy {
		HsmKeyProxy::new(
			Arc::clone(hsm) as Arc<dyn HsmClient>,
			"primary".to_string(),
			creation,
			Duration::from_secs(600),
			TimedRetry::every_second(),
		)
	}

	async fn canary(hsm: &FakeHsm, handle: HsmKeyHandle, plaintext: &[u8]) -> EncryptionKeyCanary {
		let sealed = hsm.encrypt(handle, plaintext).await.unwrap();
		EncryptionKeyCanary {
			uuid: Uuid::new_v4(),
			encrypted_canary_value: sealed.ciphertext,
			nonce: sealed.nonce,
			salt: None,
		}
	}

	#[tokio::test]
	async fn existing_alias_is_used() {
		let hsm = Arc::new(FakeHsm::default());
		let existing = hsm.install("primary");
		let mut proxy = proxy(&hsm, true);

		let key = proxy.key().await.unwrap();

		assert!(matches!(key, KeyMaterial::Hsm { handle, .. } if handle == existing));
		assert_eq!(hsm.generated(), 0);
	}

	#[tokio::test]
	async fn missing_alias_is_created_when_enabled() {
		let hsm = Arc::new(FakeHsm::default());
		let mut proxy = proxy(&hsm, true);

		proxy.key().await.unwrap();

		assert_eq!(hsm.generated(), 1);
		assert!(hsm.contains_alias("primary").await.unwrap());
	}

	#[tokio::test]
	async fn key_is_resolved_once() {
		let hsm = Arc::new(FakeHsm::default());
		hsm.install("primary");
		let mut proxy = proxy(&hsm, true);

		proxy.key().await.unwrap();
		proxy.key().await.unwrap();

		assert_eq!(hsm.alias_lookups(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn waits_for_another_instance_to_create_key() {
		let hsm = Arc::new(FakeHsm::default());
		hsm.publish_after("primary", 3);
		let mut proxy = proxy(&hsm, false);

		proxy.key().await.unwrap();

		assert_eq!(hsm.generated(), 0);
		assert_eq!(hsm.alias_lookups(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn gives_up_when_key_never_appears() {
		let hsm = Arc::new(FakeHsm::default());
		let mut proxy = proxy(&hsm, false);

		let err = proxy.key().await.unwrap_err();

		assert!(matches!(err, EncryptionError::HsmKeyTimeout { ref alias, .. } if alias == "primary"));
		assert_eq!(hsm.generated(), 0);
	}

	#[tokio::test]
	async fn canary_sealed_by_same_key_matches() {
		let hsm = Arc::new(FakeHsm::default());
		let handle = hsm.install("primary");
		let current = canary(&hsm, handle, CANARY_VALUE).await;
		let deprecated = canary(&hsm, handle, DEPRECATED_CANARY_VALUE).await;
		let mut proxy = proxy(&hsm, true);

		assert!(proxy.matches_canary(&current).await.is_match());
		assert!(proxy.matches_canary(&deprecated).await.is_match());
	}

	#[tokio::test]
	async fn canary_from_other_key_is_no_match() {
		let hsm = Arc::new(FakeHsm::default());
		hsm.install("primary");
		let other = hsm.install("retired");
		let foreign = canary(&hsm, other, CANARY_VALUE).await;
		let mut proxy = proxy(&hsm, true);

		assert!(matches!(
			proxy.matches_canary(&foreign).await,
			CanaryVerdict::NoMatch
		));
	}

	#[tokio::test]
	async fn device_failure_is_fault() {
		let hsm = Arc::new(FakeHsm::default());
		let handle = hsm.install("primary");
		let current = canary(&hsm, handle, CANARY_VALUE).await;
		hsm.fail_next_decrypt(EncryptionError::IllegalBlockSize(
			"Function 'C_Decrypt' returns 0x30".to_string(),
		));
		let mut proxy = proxy(&hsm, true);

		assert!(matches!(
			proxy.matches_canary(&current).await,
			CanaryVerdict::Fault(EncryptionError::IllegalBlockSize(_))
		));
	}
}
