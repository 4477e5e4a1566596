// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolved encryption configuration.
//!
//! These types are produced by the configuration loader and consumed by the
//! provider factory and canary mapper. The single-active-key rule is checked
//! by the mapper, not here.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use keyward_common_secret::SecretString;
use serde::{Deserialize, Serialize};

use crate::cipher::DEFAULT_PBKDF2_ITERATIONS;
use crate::error::{EncryptionError, EncryptionResult};

pub const DEFAULT_CANARY_WAIT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_HSM_KEY_WAIT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_ROTATION_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
	Internal,
	Hsm,
	KmsPlugin,
}

impl fmt::Display for ProviderType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ProviderType::Internal => "internal",
			ProviderType::Hsm => "hsm",
			ProviderType::KmsPlugin => "kms-plugin",
		})
	}
}

impl FromStr for ProviderType {
	type Err = EncryptionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"internal" => Ok(ProviderType::Internal),
			"hsm" => Ok(ProviderType::Hsm),
			"kms-plugin" => Ok(ProviderType::KmsPlugin),
			other => Err(EncryptionError::Configuration(format!(
				"unknown provider type '{other}'"
			))),
		}
	}
}

/// Provider-specific connection parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionConfig {
	#[serde(default)]
	pub host: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub partition: Option<String>,
	#[serde(default)]
	pub partition_password: Option<SecretString>,
	#[serde(default)]
	pub server_ca: Option<PathBuf>,
	#[serde(default)]
	pub client_certificate: Option<PathBuf>,
	#[serde(default)]
	pub client_key: Option<PathBuf>,
	#[serde(default)]
	pub endpoint: Option<String>,
	#[serde(default)]
	pub ca: Option<PathBuf>,
	#[serde(default)]
	pub pbkdf2_iterations: Option<u32>,
}

impl ConnectionConfig {
	pub fn pbkdf2_iterations(&self) -> u32 {
		self.pbkdf2_iterations.unwrap_or(DEFAULT_PBKDF2_ITERATIONS)
	}
}

/// One configured key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyDescriptor {
	#[serde(default)]
	pub encryption_password: Option<SecretString>,
	/// Environment variable holding the password, resolved at load time.
	#[serde(default)]
	pub encryption_password_env: Option<String>,
	#[serde(default)]
	pub encryption_key_name: Option<String>,
	#[serde(default)]
	pub active: bool,
}

impl KeyDescriptor {
	pub fn password(password: impl Into<String>, active: bool) -> Self {
		Self {
			encryption_password: Some(SecretString::new(password.into())),
			active,
			..Self::default()
		}
	}

	pub fn named(key_name: impl Into<String>, active: bool) -> Self {
		Self {
			encryption_key_name: Some(key_name.into()),
			active,
			..Self::default()
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub name: String,
	#[serde(rename = "type")]
	pub provider_type: ProviderType,
	#[serde(default)]
	pub connection: ConnectionConfig,
	#[serde(default)]
	pub keys: Vec<KeyDescriptor>,
}

impl ProviderConfig {
	pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
		Self {
			name: name.into(),
			provider_type,
			connection: ConnectionConfig::default(),
			keys: Vec::new(),
		}
	}

	pub fn with_key(mut self, key: KeyDescriptor) -> Self {
		self.keys.push(key);
		self
	}
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
	pub providers: Vec<ProviderConfig>,
	pub key_creation_enabled: bool,
	pub canary_wait_timeout: Duration,
	pub hsm_key_wait_timeout: Duration,
	pub rotation_page_size: usize,
}

impl Default for EncryptionConfig {
	fn default() -> Self {
		Self {
			providers: Vec::new(),
			key_creation_enabled: false,
			canary_wait_timeout: DEFAULT_CANARY_WAIT_TIMEOUT,
			hsm_key_wait_timeout: DEFAULT_HSM_KEY_WAIT_TIMEOUT,
			rotation_page_size: DEFAULT_ROTATION_PAGE_SIZE,
		}
	}
}

impl EncryptionConfig {
	pub fn with_providers(providers: Vec<ProviderConfig>) -> Self {
		Self {
			providers,
			..Self::default()
		}
	}

	pub fn active_key_count(&self) -> usize {
		active_key_count(&self.providers)
	}

	/// Structural checks: unique provider names, the credential each provider
	/// type needs, positive limits.
	pub fn validate(&self) -> EncryptionResult<()> {
		let mut names = HashSet::new();
		for provider in &self.providers {
			if provider.name.is_empty() {
				return Err(EncryptionError::Configuration(
					"encryption provider name must not be empty".to_string(),
				));
			}
			if !names.insert(provider.name.as_str()) {
				return Err(EncryptionError::Configuration(format!(
					"duplicate encryption provider name '{}'",
					provider.name
				)));
			}
			for (index, key) in provider.keys.iter().enumerate() {
				validate_key(provider, index, key)?;
			}
			if provider.provider_type == ProviderType::Internal
				&& provider.connection.pbkdf2_iterations == Some(0)
			{
				return Err(EncryptionError::Configuration(format!(
					"provider '{}': pbkdf2_iterations must be positive",
					provider.name
				)));
			}
		}

		if self.rotation_page_size == 0 {
			return Err(EncryptionError::Configuration(
				"rotation_page_size must be positive".to_string(),
			));
		}
		if self.canary_wait_timeout.is_zero() || self.hsm_key_wait_timeout.is_zero() {
			return Err(EncryptionError::Configuration(
				"wait timeouts must be positive".to_string(),
			));
		}
		Ok(())
	}
}

fn validate_key(provider: &ProviderConfig, index: usize, key: &KeyDescriptor) -> EncryptionResult<()> {
	match provider.provider_type {
		ProviderType::Internal => match &key.encryption_password {
			Some(password) if !password.is_empty() => Ok(()),
			_ => Err(EncryptionError::Configuration(format!(
				"provider '{}' key {index}: internal keys require encryption_password",
				provider.name
			))),
		},
		ProviderType::Hsm | ProviderType::KmsPlugin => match &key.encryption_key_name {
			Some(name) if !name.is_empty() => Ok(()),
			_ => Err(EncryptionError::Configuration(format!(
				"provider '{}' key {index}: {} keys require encryption_key_name",
				provider.name, provider.provider_type
			))),
		},
	}
}

/// Number of key descriptors marked active across all providers.
pub(crate) fn active_key_count(providers: &[ProviderConfig]) -> usize {
	providers
		.iter()
		.flat_map(|provider| &provider.keys)
		.filter(|key| key.active)
		.count()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn internal(name: &str) -> ProviderConfig {
		ProviderConfig::new(name, ProviderType::Internal)
	}

	#[test]
	fn provider_type_parses_kebab_case() {
		assert_eq!("kms-plugin".parse::<ProviderType>().unwrap(), ProviderType::KmsPlugin);
		assert_eq!("HSM".parse::<ProviderType>().unwrap(), ProviderType::Hsm);
		assert!("vault".parse::<ProviderType>().is_err());
		assert_eq!(ProviderType::KmsPlugin.to_string(), "kms-plugin");
	}

	#[test]
	fn counts_active_keys_across_providers() {
		let config = EncryptionConfig::with_providers(vec![
			internal("a").with_key(KeyDescriptor::password("one", true)),
			internal("b")
				.with_key(KeyDescriptor::password("two", false))
				.with_key(KeyDescriptor::password("three", true)),
		]);
		assert_eq!(config.active_key_count(), 2);
	}

	#[test]
	fn duplicate_provider_names_are_rejected() {
		let config = EncryptionConfig::with_providers(vec![internal("dup"), internal("dup")]);
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("duplicate"));
	}

	#[test]
	fn internal_key_without_password_is_rejected() {
		let config = EncryptionConfig::with_providers(vec![
			internal("main").with_key(KeyDescriptor::named("label", true))
		]);
		assert!(config.validate().is_err());
	}

	#[test]
	fn hsm_key_without_name_is_rejected() {
		let config = EncryptionConfig::with_providers(vec![ProviderConfig::new(
			"luna",
			ProviderType::Hsm,
		)
		.with_key(KeyDescriptor::password("pw", true))]);
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("encryption_key_name"));
	}

	#[test]
	fn zero_page_size_is_rejected() {
		let mut config = EncryptionConfig::with_providers(vec![
			internal("main").with_key(KeyDescriptor::password("pw", true))
		]);
		assert!(config.validate().is_ok());
		config.rotation_page_size = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn provider_deserializes_from_toml() {
		let provider: ProviderConfig = toml::from_str(
			r#"
				name = "luna"
				type = "hsm"

				[connection]
				host = "10.0.0.5"
				port = 1792
				partition = "p1"
				partition_password = "pw"

				[[keys]]
				encryption_key_name = "primary"
				active = true
			"#,
		)
		.unwrap();

		assert_eq!(provider.provider_type, ProviderType::Hsm);
		assert_eq!(provider.connection.port, Some(1792));
		assert_eq!(provider.keys[0].encryption_key_name.as_deref(), Some("primary"));
		assert!(!format!("{provider:?}").contains("\"pw\""));
	}
}
