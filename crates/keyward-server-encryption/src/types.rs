// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Serialize;
use uuid::Uuid;

/// Ciphertext of one stored secret, tagged with the canary of the key that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
	pub canary_uuid: Uuid,
	pub encrypted_value: Vec<u8>,
	pub nonce: Vec<u8>,
}

/// An [`EncryptedValue`] as persisted, addressed by its row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEncryptedValue {
	pub uuid: Uuid,
	pub value: EncryptedValue,
}

/// Outcome of one rotation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationSummary {
	pub inactive_keys: usize,
	pub pages: usize,
	pub rotated: usize,
	pub canaries_deleted: u64,
}
