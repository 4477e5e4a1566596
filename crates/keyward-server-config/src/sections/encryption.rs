// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encryption providers, keys and key-management timeouts.

use std::time::Duration;

use keyward_common_secret::load_secret_env;
use keyward_server_encryption::{EncryptionConfig, ProviderConfig};
use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Encryption configuration layer (partial, for merging).
///
/// `providers` is replaced as a whole by a later layer; provider lists are
/// never merged entry by entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfigLayer {
	#[serde(default)]
	pub key_creation_enabled: Option<bool>,
	#[serde(default)]
	pub canary_wait_timeout_secs: Option<u64>,
	#[serde(default)]
	pub hsm_key_wait_timeout_secs: Option<u64>,
	#[serde(default)]
	pub rotation_page_size: Option<usize>,
	#[serde(default)]
	pub providers: Option<Vec<ProviderConfig>>,
}

impl EncryptionConfigLayer {
	pub fn merge(&mut self, other: EncryptionConfigLayer) {
		if other.key_creation_enabled.is_some() {
			self.key_creation_enabled = other.key_creation_enabled;
		}
		if other.canary_wait_timeout_secs.is_some() {
			self.canary_wait_timeout_secs = other.canary_wait_timeout_secs;
		}
		if other.hsm_key_wait_timeout_secs.is_some() {
			self.hsm_key_wait_timeout_secs = other.hsm_key_wait_timeout_secs;
		}
		if other.rotation_page_size.is_some() {
			self.rotation_page_size = other.rotation_page_size;
		}
		if other.providers.is_some() {
			self.providers = other.providers;
		}
	}

	/// Resolve password references and validate the result.
	pub fn finalize(self) -> Result<EncryptionConfig, ConfigError> {
		let defaults = EncryptionConfig::default();
		let mut providers = self.providers.unwrap_or_default();
		for provider in &mut providers {
			resolve_passwords(provider)?;
		}

		let config = EncryptionConfig {
			providers,
			key_creation_enabled: self
				.key_creation_enabled
				.unwrap_or(defaults.key_creation_enabled),
			canary_wait_timeout: self
				.canary_wait_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.canary_wait_timeout),
			hsm_key_wait_timeout: self
				.hsm_key_wait_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.hsm_key_wait_timeout),
			rotation_page_size: self
				.rotation_page_size
				.unwrap_or(defaults.rotation_page_size),
		};

		config
			.validate()
			.map_err(|e| ConfigError::Validation(e.to_string()))?;
		Ok(config)
	}
}

fn resolve_passwords(provider: &mut ProviderConfig) -> Result<(), ConfigError> {
	for (index, key) in provider.keys.iter_mut().enumerate() {
		if key.encryption_password.is_some() {
			continue;
		}
		let Some(var) = key.encryption_password_env.as_deref() else {
			continue;
		};
		let password = load_secret_env(var)?.ok_or_else(|| ConfigError::MissingEnvVar {
			var: var.to_string(),
			key: format!("{}.keys[{index}].encryption_password_env", provider.name),
		})?;
		debug!(provider = %provider.name, index, var, "resolved key password from environment");
		key.encryption_password = Some(password);
	}
	Ok(())
}
