// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for key mapping, encryption and rotation.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for encryption operations.
pub type EncryptionResult<T> = Result<T, EncryptionError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum EncryptionError {
	// =========================================================================
	// Configuration Errors
	// =========================================================================
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("exactly one active encryption key must be configured, found none")]
	NoActiveKey,

	#[error("exactly one active encryption key must be configured, found {0}")]
	MultipleActiveKeys(usize),

	// =========================================================================
	// Startup Errors
	// =========================================================================
	#[error("timed out after {}s waiting for active key canary", .waited.as_secs())]
	CanaryTimeout { waited: Duration },

	#[error("timed out after {}s waiting for HSM key {alias}", .waited.as_secs())]
	HsmKeyTimeout { alias: String, waited: Duration },

	// =========================================================================
	// Key Set Errors
	// =========================================================================
	#[error("encryption key not found: {0}")]
	KeyNotFound(Uuid),

	#[error("no active encryption key is loaded")]
	ActiveKeyMissing,

	// =========================================================================
	// Cryptographic Errors
	// =========================================================================
	#[error("authentication tag mismatch")]
	AuthenticationFailed,

	#[error("illegal block size: {0}")]
	IllegalBlockSize(String),

	#[error("invalid nonce: expected {expected} bytes, got {actual}")]
	InvalidNonce { expected: usize, actual: usize },

	#[error("invalid key material: {0}")]
	InvalidKeyMaterial(String),

	#[error("encryption failed: {0}")]
	Encryption(String),

	// =========================================================================
	// Provider Errors
	// =========================================================================
	#[error("provider error: {message}")]
	Provider {
		message: String,
		#[source]
		source: Option<BoxedSource>,
	},

	#[error("provider connection failed: {0}")]
	Connection(String),

	// =========================================================================
	// Infrastructure Errors
	// =========================================================================
	#[error("storage error: {0}")]
	Storage(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl EncryptionError {
	pub fn provider(message: impl Into<String>) -> Self {
		Self::Provider {
			message: message.into(),
			source: None,
		}
	}

	pub fn provider_with_source(
		message: impl Into<String>,
		source: impl std::error::Error + Send + Sync + 'static,
	) -> Self {
		Self::Provider {
			message: message.into(),
			source: Some(Box::new(source)),
		}
	}

	/// Returns true if the failure came from the key source and a reconnect
	/// may clear it.
	pub fn is_provider_fault(&self) -> bool {
		matches!(
			self,
			EncryptionError::AuthenticationFailed
				| EncryptionError::IllegalBlockSize(_)
				| EncryptionError::Encryption(_)
				| EncryptionError::Provider { .. }
				| EncryptionError::Connection(_)
		)
	}

	/// Returns true for errors that must abort process startup.
	pub fn is_startup_fatal(&self) -> bool {
		matches!(
			self,
			EncryptionError::Configuration(_)
				| EncryptionError::NoActiveKey
				| EncryptionError::MultipleActiveKeys(_)
				| EncryptionError::CanaryTimeout { .. }
				| EncryptionError::HsmKeyTimeout { .. }
		)
	}

	/// Messages of this error and every error in its source chain, outermost first.
	pub fn chain_messages(&self) -> Vec<String> {
		let mut messages = Vec::new();
		let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
		while let Some(err) = current {
			messages.push(err.to_string());
			current = err.source();
		}
		messages
	}
}
