// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised by the concurrency slot ledger and the admission controller.
//!
//! Running out of capacity is not an error: `claim` reports it as `Ok(false)` and the
//! admission controller suspends the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// Limits are non-negative; 0 clears the limit.
    #[error("invalid concurrency limit {limit} for key '{key}': limits must be >= 0")]
    InvalidLimit { key: String, limit: i64 },

    /// A claim named a key that has no limit configured.
    #[error("concurrency key '{key}' has no limit set")]
    UnsetKey { key: String },

    /// The backing file could not be read or written.
    #[error("concurrency storage error: {0}")]
    Storage(String),
}

impl ConcurrencyError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConcurrencyError::InvalidLimit { .. } => "concurrency_invalid_limit",
            ConcurrencyError::UnsetKey { .. } => "concurrency_unset_key",
            ConcurrencyError::Storage(_) => "concurrency_storage",
        }
    }
}

impl From<std::io::Error> for ConcurrencyError {
    fn from(err: std::io::Error) -> Self {
        ConcurrencyError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConcurrencyError {
    fn from(err: serde_json::Error) -> Self {
        ConcurrencyError::Storage(err.to_string())
    }
}
