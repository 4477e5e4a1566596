// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use keyward_server_config::KeywardConfig;
use keyward_server_db::{create_pool, run_migrations, CanaryRepository, EncryptedValueRepository};
use keyward_server_encryption::{
	EncryptedValue, EncryptionKeyCanaryMapper, EncryptionKeyRotator, EncryptionKeySet,
	EncryptionProviderFactory, RetryingEncryptionService,
};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::encoding::{base64, from_base64, Encoding};

/// Mapped keys plus the stores the subcommands work on.
pub struct Runtime {
	mapper: Arc<EncryptionKeyCanaryMapper>,
	encryption: Arc<RetryingEncryptionService>,
	values: Arc<EncryptedValueRepository>,
	rotation_page_size: usize,
}

impl Runtime {
	/// Open the database and map configured keys to canaries.
	pub async fn start(config: &KeywardConfig) -> Result<Self> {
		let pool = create_pool(&config.database.url, config.database.max_connections)
			.await
			.with_context(|| format!("opening database {}", config.database.url))?;
		run_migrations(&pool).await.context("running migrations")?;

		let factory = Arc::new(EncryptionProviderFactory::new(&config.encryption));
		let canaries = Arc::new(CanaryRepository::new(pool.clone()));
		let mapper = Arc::new(EncryptionKeyCanaryMapper::new(
			&config.encryption,
			canaries,
			factory,
		));

		let mut key_set = EncryptionKeySet::with_loader(mapper.clone());
		if let Err(err) = key_set.init().await {
			if err.is_startup_fatal() {
				error!(error = %err, "encryption keys are misconfigured, refusing to start");
			}
			return Err(err).context("mapping encryption keys to canaries");
		}

		let encryption = Arc::new(RetryingEncryptionService::new(key_set));
		let values = Arc::new(EncryptedValueRepository::new(pool, encryption.clone()));

		Ok(Self {
			mapper,
			encryption,
			values,
			rotation_page_size: config.encryption.rotation_page_size,
		})
	}
}

#[derive(Debug, Serialize)]
struct KeySummary {
	uuid: Uuid,
	provider: String,
	provider_type: String,
	key_name: Option<String>,
	active: bool,
	values: u64,
}

#[derive(Debug, Serialize)]
struct EncryptedOutput {
	#[serde(skip_serializing_if = "Option::is_none")]
	id: Option<Uuid>,
	canary_uuid: Uuid,
	encrypted_value: String,
	nonce: String,
}

/// Print every loaded key with the number of stored values under it.
pub async fn keys(runtime: &Runtime) -> Result<()> {
	let counts = runtime.values.count_by_canary_uuid().await?;
	let key_set = runtime.encryption.key_set();
	let key_set = key_set.read().await;
	let active = key_set.active_uuid();

	let mut summaries: Vec<KeySummary> = key_set
		.keys()
		.map(|key| KeySummary {
			uuid: key.uuid(),
			provider: key.provider().name().to_string(),
			provider_type: key.provider().provider_type().to_string(),
			key_name: key.key_name().map(str::to_string),
			active: Some(key.uuid()) == active,
			values: counts.get(&key.uuid()).copied().unwrap_or(0),
		})
		.collect();
	summaries.sort_by(|a, b| b.active.cmp(&a.active).then(a.uuid.cmp(&b.uuid)));

	println!("{}", serde_json::to_string_pretty(&summaries)?);
	Ok(())
}

/// Re-encrypt values under inactive keys and remove their canaries.
pub async fn rotate(runtime: &Runtime) -> Result<()> {
	let rotator = EncryptionKeyRotator::new(
		runtime.values.clone(),
		runtime.mapper.clone(),
		runtime.encryption.key_set(),
		runtime.rotation_page_size,
	);
	let summary = rotator.rotate().await.context("rotation failed")?;
	info!(rotated = summary.rotated, "rotation complete");
	println!("{}", serde_json::to_string_pretty(&summary)?);
	Ok(())
}

pub async fn encrypt(
	runtime: &Runtime,
	input: &str,
	encoding: Encoding,
	store: bool,
) -> Result<()> {
	let plaintext = encoding.decode(input)?;
	let value = runtime.encryption.encrypt(&plaintext).await?;
	let id = if store {
		Some(runtime.values.insert(&value).await?)
	} else {
		None
	};

	let output = EncryptedOutput {
		id,
		canary_uuid: value.canary_uuid,
		encrypted_value: base64(&value.encrypted_value),
		nonce: base64(&value.nonce),
	};
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}

/// Where `decrypt` takes its ciphertext from.
pub enum DecryptSource {
	Stored(Uuid),
	Inline {
		canary_uuid: Uuid,
		encrypted_value: String,
		nonce: String,
	},
}

pub async fn decrypt(
	runtime: &Runtime,
	source: DecryptSource,
	encoding: Encoding,
) -> Result<()> {
	let value = match source {
		DecryptSource::Stored(id) => match runtime.values.get(id).await? {
			Some(value) => value,
			None => bail!("no encrypted value with id {id}"),
		},
		DecryptSource::Inline {
			canary_uuid,
			encrypted_value,
			nonce,
		} => EncryptedValue {
			canary_uuid,
			encrypted_value: from_base64("encrypted value", &encrypted_value)?,
			nonce: from_base64("nonce", &nonce)?,
		},
	};

	let plaintext = runtime.encryption.decrypt(&value).await?;
	println!("{}", encoding.encode(&plaintext)?);
	Ok(())
}
