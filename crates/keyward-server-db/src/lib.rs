// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite storage for encryption key canaries and encrypted values.

pub mod canary;
pub mod encrypted_value;
pub mod error;
pub mod migrations;
pub mod pool;

#[cfg(test)]
mod testing;

pub use canary::CanaryRepository;
pub use encrypted_value::EncryptedValueRepository;
pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use pool::create_pool;
