// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encryption key management for keyward.
//!
//! Configured keys are bound to persisted canaries at startup by the
//! [`EncryptionKeyCanaryMapper`], which fills an [`EncryptionKeySet`]. All
//! runtime crypto goes through the [`RetryingEncryptionService`], which
//! reconnects a failing provider exactly once per fault episode. The
//! [`EncryptionKeyRotator`] moves ciphertext off inactive keys and removes
//! their canaries.
//!
//! # Example
//!
//! ```ignore
//! let factory = Arc::new(EncryptionProviderFactory::new(&config));
//! let mapper = Arc::new(EncryptionKeyCanaryMapper::new(&config, canaries, factory));
//! let mut key_set = EncryptionKeySet::with_loader(mapper.clone());
//! key_set.init().await?;
//!
//! let encryption = RetryingEncryptionService::new(key_set);
//! let value = encryption.encrypt(b"s3cret").await?;
//! ```

pub mod canary;
pub mod cipher;
pub mod config;
pub mod error;
pub mod factory;
pub mod key;
pub mod key_proxy;
pub mod key_set;
pub mod mapper;
pub mod provider;
pub mod retrying;
pub mod rotator;
pub mod store;
pub mod timed_retry;
pub mod types;

#[cfg(test)]
mod testing;

pub use canary::{CanaryVerdict, EncryptionKeyCanary, CANARY_VALUE, DEPRECATED_CANARY_VALUE};
pub use config::{
	ConnectionConfig, EncryptionConfig, KeyDescriptor, ProviderConfig, ProviderType,
};
pub use error::{EncryptionError, EncryptionResult};
pub use factory::EncryptionProviderFactory;
pub use key::{EncryptionKey, KeyMaterial};
pub use key_proxy::KeyProxy;
pub use key_set::{EncryptionKeySet, KeySetLoader};
pub use mapper::EncryptionKeyCanaryMapper;
pub use provider::{EncryptionProvider, HsmConnector, KmsConnector};
pub use retrying::RetryingEncryptionService;
pub use rotator::EncryptionKeyRotator;
pub use store::{CanaryStore, EncryptedValueStore, InMemoryCanaryStore, InMemoryEncryptedValueStore};
pub use timed_retry::TimedRetry;
pub use types::{EncryptedValue, RotationSummary, StoredEncryptedValue};
