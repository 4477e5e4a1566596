// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One encryption service per configured provider.
//!
//! Services own device sessions, so they are created once per provider name
//! and shared by every mapping run and every key bound to that provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::config::{EncryptionConfig, ProviderConfig, ProviderType};
use crate::error::{EncryptionError, EncryptionResult};
use crate::provider::{
	EncryptionProvider, HsmConnector, HsmEncryptionService, KmsConnector,
	KmsPluginEncryptionService, PasswordEncryptionService,
};
use crate::timed_retry::TimedRetry;

pub struct EncryptionProviderFactory {
	key_creation_enabled: bool,
	hsm_key_wait_timeout: Duration,
	retry: TimedRetry,
	hsm_connector: Option<Arc<dyn HsmConnector>>,
	kms_connector: Option<Arc<dyn KmsConnector>>,
	services: Mutex<HashMap<String, Arc<dyn EncryptionProvider>>>,
}

impl EncryptionProviderFactory {
	pub fn new(config: &EncryptionConfig) -> Self {
		Self {
			key_creation_enabled: config.key_creation_enabled,
			hsm_key_wait_timeout: config.hsm_key_wait_timeout,
			retry: TimedRetry::every_second(),
			hsm_connector: None,
			kms_connector: None,
			services: Mutex::new(HashMap::new()),
		}
	}

	pub fn with_hsm_connector(mut self, connector: Arc<dyn HsmConnector>) -> Self {
		self.hsm_connector = Some(connector);
		self
	}

	pub fn with_kms_connector(mut self, connector: Arc<dyn KmsConnector>) -> Self {
		self.kms_connector = Some(connector);
		self
	}

	pub fn with_retry(mut self, retry: TimedRetry) -> Self {
		self.retry = retry;
		self
	}

	/// The service for `provider`, created on first request.
	#[instrument(skip(self, provider), fields(provider = %provider.name, provider_type = %provider.provider_type))]
	pub async fn get_encryption_service(
		&self,
		provider: &ProviderConfig,
	) -> EncryptionResult<Arc<dyn EncryptionProvider>> {
		let mut services = self.services.lock().await;
		if let Some(service) = services.get(&provider.name) {
			if service.provider_type() != provider.provider_type {
				return Err(EncryptionError::Configuration(format!(
					"provider '{}' already registered as {}",
					provider.name,
					service.provider_type()
				)));
			}
			return Ok(Arc::clone(service));
		}

		let service = self.build(provider).await?;
		services.insert(provider.name.clone(), Arc::clone(&service));
		info!("encryption service created");
		Ok(service)
	}

	async fn build(&self, provider: &ProviderConfig) -> EncryptionResult<Arc<dyn EncryptionProvider>> {
		let service: Arc<dyn EncryptionProvider> = match provider.provider_type {
			ProviderType::Internal => Arc::new(PasswordEncryptionService::new(
				&provider.name,
				provider.connection.pbkdf2_iterations(),
			)),
			ProviderType::Hsm => {
				let connector = self.hsm_connector.as_ref().ok_or_else(|| {
					EncryptionError::Configuration(format!(
						"provider '{}': no HSM connector is available",
						provider.name
					))
				})?;
				let client = connector.connect(provider).await?;
				Arc::new(
					HsmEncryptionService::new(
						&provider.name,
						client,
						self.key_creation_enabled,
						self.hsm_key_wait_timeout,
					)
					.with_retry(self.retry.clone()),
				)
			}
			ProviderType::KmsPlugin => {
				let connector = self.kms_connector.as_ref().ok_or_else(|| {
					EncryptionError::Configuration(format!(
						"provider '{}': no KMS plugin connector is available",
						provider.name
					))
				})?;
				let client = connector.connect(provider).await?;
				Arc::new(KmsPluginEncryptionService::new(&provider.name, client))
			}
		};
		Ok(service)
	}
}
