// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encryption key canary repository.

use async_trait::async_trait;
use keyward_server_encryption::{CanaryStore, EncryptionKeyCanary, EncryptionResult};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

use crate::error::{DbError, Result};

#[derive(Clone)]
pub struct CanaryRepository {
	pool: SqlitePool,
}

impl CanaryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_all(&self) -> Result<Vec<EncryptionKeyCanary>> {
		let rows = sqlx::query(
			r#"
			SELECT uuid, encrypted_canary_value, nonce, salt
			FROM encryption_key_canary
			ORDER BY uuid
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_canary_row).collect()
	}

	#[tracing::instrument(skip(self, canary), fields(canary = %canary.uuid))]
	pub async fn insert(&self, canary: &EncryptionKeyCanary) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO encryption_key_canary (uuid, encrypted_canary_value, nonce, salt)
			VALUES (?, ?, ?, ?)
			"#,
		)
		.bind(canary.uuid.to_string())
		.bind(&canary.encrypted_canary_value)
		.bind(&canary.nonce)
		.bind(&canary.salt)
		.execute(&self.pool)
		.await?;

		tracing::debug!(canary = %canary.uuid, "canary stored");
		Ok(())
	}

	/// Delete canaries by uuid, returning the number of rows removed.
	#[tracing::instrument(skip(self, uuids), fields(count = uuids.len()))]
	pub async fn delete(&self, uuids: &[Uuid]) -> Result<u64> {
		if uuids.is_empty() {
			return Ok(0);
		}

		let sql = format!(
			"DELETE FROM encryption_key_canary WHERE uuid IN ({})",
			placeholders(uuids.len())
		);
		let mut query = sqlx::query(&sql);
		for uuid in uuids {
			query = query.bind(uuid.to_string());
		}
		let result = query.execute(&self.pool).await?;

		tracing::debug!(deleted = result.rows_affected(), "canaries deleted");
		Ok(result.rows_affected())
	}
}

#[async_trait]
impl CanaryStore for CanaryRepository {
	async fn find_all(&self) -> EncryptionResult<Vec<EncryptionKeyCanary>> {
		Ok(CanaryRepository::find_all(self).await?)
	}

	async fn save(&self, canary: &EncryptionKeyCanary) -> EncryptionResult<()> {
		Ok(CanaryRepository::insert(self, canary).await?)
	}

	async fn delete(&self, uuids: &[Uuid]) -> EncryptionResult<u64> {
		Ok(CanaryRepository::delete(self, uuids).await?)
	}
}

/// `?, ?, ?` for an `IN` list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
	vec!["?"; n].join(", ")
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
	Uuid::parse_str(value).map_err(|e| DbError::InvalidRow(format!("bad uuid '{value}': {e}")))
}

fn parse_canary_row(row: &sqlx::sqlite::SqliteRow) -> Result<EncryptionKeyCanary> {
	let uuid: String = row.get("uuid");
	Ok(EncryptionKeyCanary {
		uuid: parse_uuid(&uuid)?,
		encrypted_canary_value: row.get("encrypted_canary_value"),
		nonce: row.get("nonce"),
		salt: row.get("salt"),
	})
}
