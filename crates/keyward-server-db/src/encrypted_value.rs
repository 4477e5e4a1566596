// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encrypted value repository.
//!
//! Rows are owned by the credential store; this crate only writes them here
//! for tests and the CLI, and rewrites them during rotation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keyward_server_encryption::{
	EncryptedValue, EncryptedValueStore, EncryptionResult, RetryingEncryptionService,
	StoredEncryptedValue,
};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::canary::{parse_uuid, placeholders};
use crate::error::Result;

#[derive(Clone)]
pub struct EncryptedValueRepository {
	pool: SqlitePool,
	encryption: Arc<RetryingEncryptionService>,
}

impl EncryptedValueRepository {
	pub fn new(pool: SqlitePool, encryption: Arc<RetryingEncryptionService>) -> Self {
		Self { pool, encryption }
	}

	#[tracing::instrument(skip(self, value), fields(key = %value.canary_uuid))]
	pub async fn insert(&self, value: &EncryptedValue) -> Result<Uuid> {
		let uuid = Uuid::new_v4();
		sqlx::query(
			r#"
			INSERT INTO encrypted_value (uuid, encryption_key_uuid, encrypted_value, nonce)
			VALUES (?, ?, ?, ?)
			"#,
		)
		.bind(uuid.to_string())
		.bind(value.canary_uuid.to_string())
		.bind(&value.encrypted_value)
		.bind(&value.nonce)
		.execute(&self.pool)
		.await?;

		tracing::debug!(value = %uuid, "encrypted value stored");
		Ok(uuid)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get(&self, uuid: Uuid) -> Result<Option<EncryptedValue>> {
		let row = sqlx::query(
			r#"
			SELECT uuid, encryption_key_uuid, encrypted_value, nonce
			FROM encrypted_value
			WHERE uuid = ?
			"#,
		)
		.bind(uuid.to_string())
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(row) => Ok(Some(parse_value_row(&row)?.value)),
			None => Ok(None),
		}
	}

	#[tracing::instrument(skip(self, canary_uuids), fields(keys = canary_uuids.len()))]
	pub async fn find_by_canary_uuids(
		&self,
		canary_uuids: &[Uuid],
		limit: usize,
	) -> Result<Vec<StoredEncryptedValue>> {
		if canary_uuids.is_empty() || limit == 0 {
			return Ok(Vec::new());
		}

		let sql = format!(
			r#"
			SELECT uuid, encryption_key_uuid, encrypted_value, nonce
			FROM encrypted_value
			WHERE encryption_key_uuid IN ({})
			ORDER BY uuid
			LIMIT ?
			"#,
			placeholders(canary_uuids.len())
		);
		let mut query = sqlx::query(&sql);
		for uuid in canary_uuids {
			query = query.bind(uuid.to_string());
		}
		let rows = query
			.bind(i64::try_from(limit).unwrap_or(i64::MAX))
			.fetch_all(&self.pool)
			.await?;

		rows.iter().map(parse_value_row).collect()
	}

	/// Overwrite key uuid, ciphertext and nonce of one row.
	///
	/// The update only applies while the row is still under `previous_key`, so
	/// a concurrent rewrite is never clobbered. Returns whether a row changed.
	#[tracing::instrument(skip(self, value), fields(value = %uuid))]
	pub async fn replace(
		&self,
		uuid: Uuid,
		previous_key: Uuid,
		value: &EncryptedValue,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE encrypted_value
			SET encryption_key_uuid = ?, encrypted_value = ?, nonce = ?
			WHERE uuid = ? AND encryption_key_uuid = ?
			"#,
		)
		.bind(value.canary_uuid.to_string())
		.bind(&value.encrypted_value)
		.bind(&value.nonce)
		.bind(uuid.to_string())
		.bind(previous_key.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() == 1)
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_by_canary_uuid(&self) -> Result<HashMap<Uuid, u64>> {
		let rows = sqlx::query(
			r#"
			SELECT encryption_key_uuid, COUNT(*) AS value_count
			FROM encrypted_value
			GROUP BY encryption_key_uuid
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		let mut counts = HashMap::with_capacity(rows.len());
		for row in rows {
			let key: String = row.get("encryption_key_uuid");
			let count: i64 = row.get("value_count");
			counts.insert(parse_uuid(&key)?, count.max(0) as u64);
		}
		Ok(counts)
	}
}

#[async_trait]
impl EncryptedValueStore for EncryptedValueRepository {
	async fn find_by_canary_uuids(
		&self,
		canary_uuids: &[Uuid],
		limit: usize,
	) -> EncryptionResult<Vec<StoredEncryptedValue>> {
		Ok(EncryptedValueRepository::find_by_canary_uuids(self, canary_uuids, limit).await?)
	}

	async fn rotate(&self, stored: &StoredEncryptedValue) -> EncryptionResult<()> {
		let plaintext = self.encryption.decrypt(&stored.value).await?;
		let rotated = self.encryption.encrypt(&plaintext).await?;

		let replaced = self
			.replace(stored.uuid, stored.value.canary_uuid, &rotated)
			.await?;
		if replaced {
			tracing::debug!(value = %stored.uuid, key = %rotated.canary_uuid, "encrypted value rotated");
		} else {
			tracing::debug!(value = %stored.uuid, "encrypted value changed concurrently, skipped");
		}
		Ok(())
	}

	async fn count_by_canary_uuid(&self) -> EncryptionResult<HashMap<Uuid, u64>> {
		Ok(EncryptedValueRepository::count_by_canary_uuid(self).await?)
	}
}

fn parse_value_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredEncryptedValue> {
	let uuid: String = row.get("uuid");
	let key: String = row.get("encryption_key_uuid");
	Ok(StoredEncryptedValue {
		uuid: parse_uuid(&uuid)?,
		value: EncryptedValue {
			canary_uuid: parse_uuid(&key)?,
			encrypted_value: row.get("encrypted_value"),
			nonce: row.get("nonce"),
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use keyward_server_encryption::{
		EncryptionConfig, EncryptionKeyCanaryMapper, EncryptionKeyRotator, EncryptionKeySet,
		EncryptionProviderFactory, KeyDescriptor, ProviderConfig, ProviderType, RotationSummary,
	};

	use crate::canary::CanaryRepository;
	use crate::testing::create_test_pool;

	struct Keys {
		mapper: Arc<EncryptionKeyCanaryMapper>,
		encryption: Arc<RetryingEncryptionService>,
	}

	async fn map_keys(pool: &SqlitePool, keys: Vec<KeyDescriptor>) -> Keys {
		let mut provider = ProviderConfig::new("internal", ProviderType::Internal);
		provider.connection.pbkdf2_iterations = Some(1);
		provider.keys = keys;
		let config = EncryptionConfig {
			key_creation_enabled: true,
			..EncryptionConfig::with_providers(vec![provider])
		};

		let factory = Arc::new(EncryptionProviderFactory::new(&config));
		let canaries = Arc::new(CanaryRepository::new(pool.clone()));
		let mapper = Arc::new(EncryptionKeyCanaryMapper::new(&config, canaries, factory));
		let mut key_set = EncryptionKeySet::with_loader(mapper.clone());
		key_set.init().await.unwrap();

		Keys {
			mapper,
			encryption: Arc::new(RetryingEncryptionService::new(key_set)),
		}
	}

	#[tokio::test]
	async fn values_are_stored_and_counted_per_key() {
		let pool = create_test_pool().await;
		let keys = map_keys(&pool, vec![KeyDescriptor::password("pw", true)]).await;
		let repo = EncryptedValueRepository::new(pool, keys.encryption.clone());

		let value = keys.encryption.encrypt(b"one").await.unwrap();
		let uuid = repo.insert(&value).await.unwrap();
		repo.insert(&keys.encryption.encrypt(b"two").await.unwrap())
			.await
			.unwrap();

		assert_eq!(repo.get(uuid).await.unwrap(), Some(value.clone()));
		assert_eq!(repo.get(Uuid::new_v4()).await.unwrap(), None);
		assert_eq!(
			repo.count_by_canary_uuid().await.unwrap(),
			HashMap::from([(value.canary_uuid, 2)])
		);
	}

	#[tokio::test]
	async fn value_must_reference_known_canary() {
		let pool = create_test_pool().await;
		let keys = map_keys(&pool, vec![KeyDescriptor::password("pw", true)]).await;
		let repo = EncryptedValueRepository::new(pool, keys.encryption.clone());

		let mut value = keys.encryption.encrypt(b"orphan").await.unwrap();
		value.canary_uuid = Uuid::new_v4();

		assert!(repo.insert(&value).await.is_err());
	}

	#[tokio::test]
	async fn pages_are_limited_and_filtered_by_key() {
		let pool = create_test_pool().await;
		let keys = map_keys(&pool, vec![KeyDescriptor::password("pw", true)]).await;
		let repo = EncryptedValueRepository::new(pool, keys.encryption.clone());
		let mut key = Uuid::nil();
		for n in 0..3u8 {
			let value = keys.encryption.encrypt(&[n]).await.unwrap();
			key = value.canary_uuid;
			repo.insert(&value).await.unwrap();
		}

		assert_eq!(repo.find_by_canary_uuids(&[key], 2).await.unwrap().len(), 2);
		assert_eq!(repo.find_by_canary_uuids(&[key], 10).await.unwrap().len(), 3);
		assert!(repo
			.find_by_canary_uuids(&[Uuid::new_v4()], 10)
			.await
			.unwrap()
			.is_empty());
		assert!(repo.find_by_canary_uuids(&[], 10).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn replace_requires_unchanged_key() {
		let pool = create_test_pool().await;
		let keys = map_keys(&pool, vec![KeyDescriptor::password("pw", true)]).await;
		let repo = EncryptedValueRepository::new(pool, keys.encryption.clone());
		let original = keys.encryption.encrypt(b"v1").await.unwrap();
		let uuid = repo.insert(&original).await.unwrap();
		let rewritten = keys.encryption.encrypt(b"v2").await.unwrap();

		assert!(!repo.replace(uuid, Uuid::new_v4(), &rewritten).await.unwrap());
		assert_eq!(repo.get(uuid).await.unwrap(), Some(original.clone()));

		assert!(repo.replace(uuid, original.canary_uuid, &rewritten).await.unwrap());
		assert_eq!(repo.get(uuid).await.unwrap(), Some(rewritten));
	}

	#[tokio::test]
	async fn rotation_moves_values_and_drops_retired_canary() {
		let pool = create_test_pool().await;

		let old = map_keys(&pool, vec![KeyDescriptor::password("old", true)]).await;
		let old_repo = EncryptedValueRepository::new(pool.clone(), old.encryption.clone());
		let first = old_repo
			.insert(&old.encryption.encrypt(b"first").await.unwrap())
			.await
			.unwrap();
		let second = old_repo
			.insert(&old.encryption.encrypt(b"second").await.unwrap())
			.await
			.unwrap();

		let current = map_keys(
			&pool,
			vec![
				KeyDescriptor::password("old", false),
				KeyDescriptor::password("new", true),
			],
		)
		.await;
		let repo = Arc::new(EncryptedValueRepository::new(pool.clone(), current.encryption.clone()));
		let third_value = current.encryption.encrypt(b"third").await.unwrap();
		let third = repo.insert(&third_value).await.unwrap();
		let active = third_value.canary_uuid;

		let rotator = EncryptionKeyRotator::new(
			repo.clone(),
			current.mapper.clone(),
			current.encryption.key_set(),
			1,
		);
		let summary = rotator.rotate().await.unwrap();

		assert_eq!(
			summary,
			RotationSummary {
				inactive_keys: 1,
				pages: 2,
				rotated: 2,
				canaries_deleted: 1,
			}
		);
		assert_eq!(
			repo.count_by_canary_uuid().await.unwrap(),
			HashMap::from([(active, 3)])
		);
		assert_eq!(repo.get(third).await.unwrap(), Some(third_value));
		for (uuid, expected) in [(first, b"first".as_slice()), (second, b"second".as_slice())] {
			let value = repo.get(uuid).await.unwrap().unwrap();
			let plaintext = current.encryption.decrypt(&value).await.unwrap();
			assert_eq!(plaintext.as_slice(), expected);
		}

		let canaries = CanaryRepository::new(pool).find_all().await.unwrap();
		assert_eq!(canaries.len(), 1);
		assert_eq!(canaries[0].uuid, active);
	}
}
