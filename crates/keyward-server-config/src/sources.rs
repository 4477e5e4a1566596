// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, TOML file and environment.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::KeywardConfigLayer;
use crate::sections::{DatabaseConfigLayer, EncryptionConfigLayer};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/keyward/keyward.toml";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<KeywardConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<KeywardConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(KeywardConfigLayer::default())
	}
}

/// TOML file source. A missing file contributes an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new(SYSTEM_CONFIG_PATH)
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<KeywardConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(KeywardConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: KeywardConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: KEYWARD_<SECTION>_<FIELD>. Providers and keys are only
/// configurable through the file.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<KeywardConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(KeywardConfigLayer {
			encryption: Some(load_encryption_from_env()?),
			database: Some(load_database_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
	match env_var(name) {
		Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => Ok(Some(true)),
		Some(v) if v == "0" || v.eq_ignore_ascii_case("false") => Ok(Some(false)),
		Some(v) => Err(ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid boolean value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {} value '{v}'", std::any::type_name::<T>()),
		}),
		None => Ok(None),
	}
}

fn load_encryption_from_env() -> Result<EncryptionConfigLayer, ConfigError> {
	Ok(EncryptionConfigLayer {
		key_creation_enabled: env_bool("KEYWARD_ENCRYPTION_KEY_CREATION_ENABLED")?,
		canary_wait_timeout_secs: env_parse("KEYWARD_ENCRYPTION_CANARY_WAIT_TIMEOUT_SECS")?,
		hsm_key_wait_timeout_secs: env_parse("KEYWARD_ENCRYPTION_HSM_KEY_WAIT_TIMEOUT_SECS")?,
		rotation_page_size: env_parse("KEYWARD_ENCRYPTION_ROTATION_PAGE_SIZE")?,
		providers: None,
	})
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("KEYWARD_DATABASE_URL"),
		max_connections: env_parse("KEYWARD_DATABASE_MAX_CONNECTIONS")?,
	})
}
