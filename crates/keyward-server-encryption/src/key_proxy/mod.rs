// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-descriptor adapters between configuration and key material.
//!
//! A proxy resolves its key lazily and can test whether a persisted canary
//! was produced by that key. Proxies live only for one mapping run.

mod external;
mod hsm;
mod password;

pub use external::ExternalKeyProxy;
pub use hsm::HsmKeyProxy;
pub use password::PasswordKeyProxy;

use async_trait::async_trait;

use crate::canary::{CanaryVerdict, EncryptionKeyCanary};
use crate::error::EncryptionResult;
use crate::key::KeyMaterial;

#[async_trait]
pub trait KeyProxy: Send + Sync {
	/// Key material for this descriptor, resolving it on first use.
	async fn key(&mut self) -> EncryptionResult<KeyMaterial>;

	/// Test the canary against this key.
	async fn matches_canary(&mut self, canary: &EncryptionKeyCanary) -> CanaryVerdict;

	/// Salt the current key was derived with, for keys that have one.
	fn salt(&self) -> Option<&[u8]>;
}
