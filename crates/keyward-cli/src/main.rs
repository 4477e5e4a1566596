// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! keyward command line.
//!
//! Maps the configured encryption keys to their canaries on startup, then
//! runs one subcommand against the store.

mod commands;
mod encoding;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::commands::{DecryptSource, Runtime};
use crate::encoding::Encoding;

#[derive(Parser, Debug)]
#[command(name = "keyward", version, about = "Encryption key management for the keyward secret store")]
struct Args {
	/// Config file. Defaults to /etc/keyward/keyward.toml when present.
	#[arg(long, short, global = true, env = "KEYWARD_CONFIG")]
	config: Option<PathBuf>,

	/// Log level used when RUST_LOG is unset
	#[arg(long, global = true, default_value = "info")]
	log_level: String,

	/// Emit logs as JSON
	#[arg(long, global = true)]
	log_json: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// List mapped keys and how many values each one protects
	Keys,

	/// Re-encrypt values under inactive keys with the active key
	Rotate,

	/// Encrypt a value with the active key
	Encrypt {
		value: String,

		#[arg(long, value_enum, default_value_t)]
		input: Encoding,

		/// Persist the ciphertext and print its id
		#[arg(long)]
		store: bool,
	},

	/// Decrypt a stored value or an inline ciphertext
	#[command(group(ArgGroup::new("source").required(true).args(["id", "key"])))]
	Decrypt {
		/// Id of a stored value
		#[arg(long)]
		id: Option<Uuid>,

		/// Canary uuid of the key that produced the ciphertext
		#[arg(long, requires_all = ["ciphertext", "nonce"])]
		key: Option<Uuid>,

		/// Base64 ciphertext
		#[arg(long)]
		ciphertext: Option<String>,

		/// Base64 nonce
		#[arg(long)]
		nonce: Option<String>,

		#[arg(long, value_enum, default_value_t)]
		output: Encoding,
	},
}

fn init_tracing(level: &str, json: bool) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("keyward={level},warn")));

	// stdout carries command output
	if json {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().compact().with_writer(std::io::stderr))
			.init();
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_tracing(&args.log_level, args.log_json);

	let config = match &args.config {
		Some(path) => keyward_server_config::load_config_with_file(path),
		None => keyward_server_config::load_config(),
	}
	.context("loading configuration")?;

	let runtime = Runtime::start(&config).await?;

	match args.command {
		Command::Keys => commands::keys(&runtime).await,
		Command::Rotate => commands::rotate(&runtime).await,
		Command::Encrypt {
			value,
			input,
			store,
		} => commands::encrypt(&runtime, &value, input, store).await,
		Command::Decrypt {
			id,
			key,
			ciphertext,
			nonce,
			output,
		} => {
			let source = match (id, key, ciphertext, nonce) {
				(Some(id), _, _, _) => DecryptSource::Stored(id),
				(None, Some(canary_uuid), Some(encrypted_value), Some(nonce)) => {
					DecryptSource::Inline {
						canary_uuid,
						encrypted_value,
						nonce,
					}
				}
				_ => anyhow::bail!("--key needs --ciphertext and --nonce"),
			};
			commands::decrypt(&runtime, source, output).await
		}
	}
}
