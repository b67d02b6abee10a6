// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout The Runwood. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep field names consistent between log lines and spans
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::concurrency` - slot claims, frees, limits and admission waits
//! * `messages::run` - run and step status transitions
//! * `messages::daemon` - heartbeats and daemon health
//! * `messages::engine` - run executor lifecycle
//! * `messages::validation` - job graph validation failures
//!
//! # Usage
//!
//! ```rust
//! use the_runwood::observability::messages::concurrency::ConcurrencyLimitSet;
//! use the_runwood::observability::messages::StructuredLog;
//!
//! let msg = ConcurrencyLimitSet {
//!     key: "foo",
//!     limit: 10,
//! };
//!
//! msg.log();
//! ```

use tracing_subscriber::EnvFilter;

pub mod messages;

/// Default filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install the global `tracing` subscriber (fmt layer + `RUST_LOG` env filter).
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
