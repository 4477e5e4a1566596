// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Canary records and the verdict of testing a key against one.
//!
//! A canary is a well-known plaintext encrypted under one key generation. A
//! key "matches" a canary when decrypting it yields either the current or the
//! deprecated plaintext. Decrypt failures are classified into a wrong key
//! (no match) or a real provider fault through [`classify`].

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{EncryptionError, EncryptionResult};

/// Plaintext sealed into every canary created by this version.
pub const CANARY_VALUE: &[u8] = &[0u8; 64];

/// Plaintext used by canaries written before the current value was adopted.
pub const DEPRECATED_CANARY_VALUE: &[u8] = &[0u8; 128];

/// Native error fragments meaning "this ciphertext was not produced by this key".
///
/// HSM drivers report a GCM tag mismatch as a block-size failure carrying
/// `CKR_ENCRYPTED_DATA_INVALID` (PKCS#11 code 0x40) instead of a tag error.
pub const WRONG_KEY_SIGNATURES: &[&str] = &["returns 0x40", "CKR_ENCRYPTED_DATA_INVALID"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKeyCanary {
	pub uuid: Uuid,
	pub encrypted_canary_value: Vec<u8>,
	pub nonce: Vec<u8>,
	pub salt: Option<Vec<u8>>,
}

impl EncryptionKeyCanary {
	/// The salt, treating an empty one as absent.
	pub fn salt(&self) -> Option<&[u8]> {
		self.salt.as_deref().filter(|salt| !salt.is_empty())
	}
}

#[derive(Debug)]
pub enum CanaryVerdict {
	Match,
	NoMatch,
	Fault(EncryptionError),
}

impl CanaryVerdict {
	pub fn is_match(&self) -> bool {
		matches!(self, CanaryVerdict::Match)
	}
}

pub fn is_canary_plaintext(plaintext: &[u8]) -> bool {
	plaintext == CANARY_VALUE || plaintext == DEPRECATED_CANARY_VALUE
}

/// True if the error, or anything in its source chain, carries a wrong-key signature.
pub fn is_wrong_key_error(error: &EncryptionError) -> bool {
	error.chain_messages().iter().any(|message| {
		WRONG_KEY_SIGNATURES
			.iter()
			.any(|signature| message.contains(signature))
	})
}

/// Classify the outcome of decrypting a canary.
pub fn classify(result: EncryptionResult<Zeroizing<Vec<u8>>>) -> CanaryVerdict {
	match result {
		Ok(plaintext) if is_canary_plaintext(&plaintext) => CanaryVerdict::Match,
		Ok(_) => CanaryVerdict::NoMatch,
		Err(EncryptionError::AuthenticationFailed) => CanaryVerdict::NoMatch,
		Err(err) if is_wrong_key_error(&err) => CanaryVerdict::NoMatch,
		Err(err) => CanaryVerdict::Fault(err),
	}
}
