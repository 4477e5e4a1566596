// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Byte encodings accepted and printed by the CLI.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Encoding {
	/// UTF-8 text
	#[default]
	Text,
	Hex,
	Base64,
}

impl Encoding {
	pub fn decode(self, input: &str) -> Result<Vec<u8>> {
		match self {
			Encoding::Text => Ok(input.as_bytes().to_vec()),
			Encoding::Hex => hex::decode(input.trim()).context("input is not valid hex"),
			Encoding::Base64 => STANDARD
				.decode(input.trim())
				.context("input is not valid base64"),
		}
	}

	pub fn encode(self, bytes: &[u8]) -> Result<String> {
		match self {
			Encoding::Text => String::from_utf8(bytes.to_vec())
				.context("plaintext is not UTF-8, use --output hex or base64"),
			Encoding::Hex => Ok(hex::encode(bytes)),
			Encoding::Base64 => Ok(STANDARD.encode(bytes)),
		}
	}
}

pub fn base64(bytes: &[u8]) -> String {
	STANDARD.encode(bytes)
}

pub fn from_base64(field: &str, input: &str) -> Result<Vec<u8>> {
	STANDARD
		.decode(input.trim())
		.with_context(|| format!("{field} is not valid base64"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_each_encoding() {
		assert_eq!(Encoding::Text.decode("hi").unwrap(), b"hi");
		assert_eq!(Encoding::Hex.decode("6869\n").unwrap(), b"hi");
		assert_eq!(Encoding::Base64.decode("aGk=").unwrap(), b"hi");
	}

	#[test]
	fn rejects_malformed_input() {
		assert!(Encoding::Hex.decode("zz").is_err());
		assert!(Encoding::Base64.decode("***").is_err());
		assert!(from_base64("nonce", "***").is_err());
	}

	#[test]
	fn binary_plaintext_needs_binary_encoding() {
		let bytes = [0xff, 0x00];
		assert!(Encoding::Text.encode(&bytes).is_err());
		assert_eq!(Encoding::Hex.encode(&bytes).unwrap(), "ff00");
		assert_eq!(Encoding::Base64.encode(&bytes).unwrap(), base64(&bytes));
	}
}
