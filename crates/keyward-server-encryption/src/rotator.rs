// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Moves stored ciphertext off inactive keys.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::EncryptionResult;
use crate::key_set::EncryptionKeySet;
use crate::mapper::EncryptionKeyCanaryMapper;
use crate::store::EncryptedValueStore;
use crate::types::RotationSummary;

pub struct EncryptionKeyRotator {
	values: Arc<dyn EncryptedValueStore>,
	mapper: Arc<EncryptionKeyCanaryMapper>,
	key_set: Arc<RwLock<EncryptionKeySet>>,
	page_size: usize,
}

impl EncryptionKeyRotator {
	pub fn new(
		values: Arc<dyn EncryptedValueStore>,
		mapper: Arc<EncryptionKeyCanaryMapper>,
		key_set: Arc<RwLock<EncryptionKeySet>>,
		page_size: usize,
	) -> Self {
		Self {
			values,
			mapper,
			key_set,
			page_size: page_size.max(1),
		}
	}

	/// Re-encrypt every value held under an inactive key, then delete the
	/// canaries of those keys.
	///
	/// Any failure aborts the pass before canary deletion.
	#[instrument(skip(self), fields(page_size = self.page_size))]
	pub async fn rotate(&self) -> EncryptionResult<RotationSummary> {
		let inactive = self.key_set.read().await.inactive_uuids();
		let mut summary = RotationSummary {
			inactive_keys: inactive.len(),
			..RotationSummary::default()
		};
		if inactive.is_empty() {
			info!("no inactive keys, nothing to rotate");
			return Ok(summary);
		}

		let counts = self.values.count_by_canary_uuid().await?;
		let pending: u64 = inactive.iter().filter_map(|uuid| counts.get(uuid)).sum();
		info!(inactive_keys = inactive.len(), pending, "starting key rotation");

		loop {
			let page = self
				.values
				.find_by_canary_uuids(&inactive, self.page_size)
				.await?;
			if page.is_empty() {
				break;
			}
			for value in &page {
				self.values.rotate(value).await?;
			}
			summary.pages += 1;
			summary.rotated += page.len();
			debug!(page = summary.pages, rotated = summary.rotated, "rotated page");
		}

		summary.canaries_deleted = self.mapper.delete(&inactive).await?;
		info!(
			rotated = summary.rotated,
			pages = summary.pages,
			canaries_deleted = summary.canaries_deleted,
			"key rotation finished"
		);
		Ok(summary)
	}
}
