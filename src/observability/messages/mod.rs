// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human-readable line and
//! [`StructuredLog`] to emit the same information as structured `tracing` fields.
//!
//! # Organization
//!
//! * `concurrency` - ledger and admission controller events
//! * `run` - run/step state machine transitions
//! * `daemon` - heartbeat and health events
//! * `engine` - executor lifecycle
//! * `validation` - job graph structural errors
//!
//! # Usage Pattern
//!
//! ```rust
//! use the_runwood::observability::messages::engine::ExecutionStarted;
//!
//! let msg = ExecutionStarted {
//!     run_id: "3c1f",
//!     job_name: "basic_example",
//!     node_count: 3,
//!     max_concurrency: 4,
//! };
//!
//! tracing::info!("{}", msg);
//! ```

use tracing::Span;

pub mod concurrency;
pub mod daemon;
pub mod engine;
pub mod run;
pub mod validation;

/// Emits a message at its documented level with structured fields.
pub trait StructuredLog {
    /// Log the message as a single `tracing` event.
    fn log(&self);

    /// Build a span carrying the same fields, for wrapping the work the message describes.
    fn span(&self, name: &str) -> Span;
}
