// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration loading for keyward.
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`/etc/keyward/keyward.toml` or an explicit path)
//! 3. Environment variables (`KEYWARD_*`)
//!
//! # Usage
//!
//! ```ignore
//! use keyward_server_config::load_config_with_file;
//!
//! let config = load_config_with_file("keyward.toml")?;
//! println!("{} encryption providers", config.encryption.providers.len());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::KeywardConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use keyward_server_encryption::EncryptionConfig;
use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct KeywardConfig {
	pub encryption: EncryptionConfig,
	pub database: DatabaseConfig,
}

/// Load configuration from defaults, the system config file and the environment.
pub fn load_config() -> Result<KeywardConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<KeywardConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<KeywardConfig, ConfigError> {
	load_from(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<KeywardConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = KeywardConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

fn finalize(layer: KeywardConfigLayer) -> Result<KeywardConfig, ConfigError> {
	let encryption = layer.encryption.unwrap_or_default().finalize()?;
	let database = layer.database.unwrap_or_default().finalize();

	info!(
		database = %database.url,
		providers = encryption.providers.len(),
		active_keys = encryption.active_key_count(),
		key_creation_enabled = encryption.key_creation_enabled,
		canary_wait_timeout_secs = encryption.canary_wait_timeout.as_secs(),
		"keyward configuration loaded"
	);

	Ok(KeywardConfig {
		encryption,
		database,
	})
}
