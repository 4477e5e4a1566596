// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for keyward.

pub mod database;
pub mod encryption;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use encryption::EncryptionConfigLayer;
