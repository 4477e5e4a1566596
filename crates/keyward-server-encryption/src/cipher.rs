// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AES-256-GCM sealing and PBKDF2 key derivation for software-held keys.
//!
//! Password-derived keys use PBKDF2-HMAC-SHA384 with a salt as long as the
//! SHA-384 digest. The derived key is always 256 bits.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use keyward_common_secret::SecretString;
use rand::RngCore;
use sha2::Sha384;
use zeroize::Zeroizing;

use crate::error::{EncryptionError, EncryptionResult};

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Salt length for password-derived keys, equal to the SHA-384 output size.
pub const SALT_SIZE: usize = 48;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Ciphertext together with the nonce it was produced under.
///
/// Providers that manage nonces internally may return an empty nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
	pub ciphertext: Vec<u8>,
	pub nonce: Vec<u8>,
}

pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	OsRng.fill_bytes(key.as_mut_slice());
	key
}

/// Random 96-bit nonce. A (key, nonce) pair must never repeat; at the
/// volumes a single key sees, random nonces keep that probability negligible.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
	let mut nonce = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

pub fn generate_salt() -> Vec<u8> {
	let mut salt = vec![0u8; SALT_SIZE];
	OsRng.fill_bytes(&mut salt);
	salt
}

/// Derive an AES-256 key from a password and salt.
pub fn derive_key(
	password: &SecretString,
	salt: &[u8],
	iterations: u32,
) -> Zeroizing<[u8; KEY_SIZE]> {
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	pbkdf2::pbkdf2_hmac::<Sha384>(
		password.expose_bytes(),
		salt,
		iterations,
		key.as_mut_slice(),
	);
	key
}

pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> EncryptionResult<Sealed> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
	let nonce = generate_nonce();

	let ciphertext = cipher
		.encrypt(Nonce::from_slice(&nonce), plaintext)
		.map_err(|e| EncryptionError::Encryption(format!("AES-GCM seal failed: {e}")))?;

	Ok(Sealed {
		ciphertext,
		nonce: nonce.to_vec(),
	})
}

/// Decrypt and authenticate. A wrong key or tampered ciphertext yields
/// [`EncryptionError::AuthenticationFailed`].
pub fn open(
	key: &[u8; KEY_SIZE],
	ciphertext: &[u8],
	nonce: &[u8],
) -> EncryptionResult<Zeroizing<Vec<u8>>> {
	if nonce.len() != NONCE_SIZE {
		return Err(EncryptionError::InvalidNonce {
			expected: NONCE_SIZE,
			actual: nonce.len(),
		});
	}

	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
	let plaintext = cipher
		.decrypt(Nonce::from_slice(nonce), ciphertext)
		.map_err(|_| EncryptionError::AuthenticationFailed)?;

	Ok(Zeroizing::new(plaintext))
}
