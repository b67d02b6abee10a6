// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the concurrency slot ledger and admission controller.
//!
//! This module contains message types for logging events related to:
//! * Limit changes
//! * Slot claims and frees
//! * Admission waits and abandoned waiters

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A concurrency key's limit was set or cleared.
///
/// # Log Level
/// `info!` - Administrative change
///
/// # Example
/// ```
/// use the_runwood::observability::messages::concurrency::ConcurrencyLimitSet;
///
/// let msg = ConcurrencyLimitSet { key: "foo", limit: 5 };
/// assert_eq!(msg.to_string(), "Set concurrency limit for foo to 5.");
/// ```
pub struct ConcurrencyLimitSet<'a> {
    pub key: &'a str,
    pub limit: usize,
}

impl Display for ConcurrencyLimitSet<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Set concurrency limit for {} to {}.", self.key, self.limit)
    }
}

impl StructuredLog for ConcurrencyLimitSet<'_> {
    fn log(&self) {
        tracing::info!(
            concurrency_key = self.key,
            limit = self.limit,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "concurrency_limit_set",
            span_name = name,
            concurrency_key = self.key,
            limit = self.limit,
        )
    }
}

/// A step acquired slots for all of its keys.
///
/// # Log Level
/// `debug!` - High-frequency operational event
pub struct SlotsClaimed<'a> {
    pub run_id: &'a str,
    pub step_key: &'a str,
    pub keys: &'a [String],
}

impl Display for SlotsClaimed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Step '{}' of run {} claimed concurrency slots for [{}]",
            self.step_key,
            self.run_id,
            self.keys.join(", ")
        )
    }
}

impl StructuredLog for SlotsClaimed<'_> {
    fn log(&self) {
        tracing::debug!(
            run_id = self.run_id,
            step_key = self.step_key,
            keys = %self.keys.join(","),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "slots_claimed",
            span_name = name,
            run_id = self.run_id,
            step_key = self.step_key,
        )
    }
}

/// A step could not claim its slots and is waiting in the admission queue.
///
/// # Log Level
/// `debug!` - Expected back-pressure, not a failure
pub struct SlotClaimDeferred<'a> {
    pub run_id: &'a str,
    pub step_key: &'a str,
    pub keys: &'a [String],
    pub ticket: u64,
}

impl Display for SlotClaimDeferred<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Step '{}' of run {} waiting for concurrency slots [{}] (ticket {})",
            self.step_key,
            self.run_id,
            self.keys.join(", "),
            self.ticket
        )
    }
}

impl StructuredLog for SlotClaimDeferred<'_> {
    fn log(&self) {
        tracing::debug!(
            run_id = self.run_id,
            step_key = self.step_key,
            keys = %self.keys.join(","),
            ticket = self.ticket,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "slot_claim_deferred",
            span_name = name,
            run_id = self.run_id,
            step_key = self.step_key,
            ticket = self.ticket,
        )
    }
}

/// Slots held by a run (or one of its steps) were released.
///
/// # Log Level
/// `debug!` - High-frequency operational event
pub struct SlotsFreed<'a> {
    pub run_id: &'a str,
    pub step_key: Option<&'a str>,
    pub keys: &'a [String],
}

impl Display for SlotsFreed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.step_key {
            Some(step_key) => write!(
                f,
                "Freed concurrency slots [{}] held by step '{}' of run {}",
                self.keys.join(", "),
                step_key,
                self.run_id
            ),
            None => write!(
                f,
                "Freed concurrency slots [{}] held by run {}",
                self.keys.join(", "),
                self.run_id
            ),
        }
    }
}

impl StructuredLog for SlotsFreed<'_> {
    fn log(&self) {
        tracing::debug!(
            run_id = self.run_id,
            step_key = self.step_key,
            keys = %self.keys.join(","),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "slots_freed",
            span_name = name,
            run_id = self.run_id,
            step_key = self.step_key,
        )
    }
}

/// A waiter left the admission queue without claiming (timeout or cancellation).
///
/// # Log Level
/// `debug!`
pub struct WaiterAbandoned<'a> {
    pub run_id: &'a str,
    pub step_key: &'a str,
    pub ticket: u64,
}

impl Display for WaiterAbandoned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Step '{}' of run {} left the admission queue (ticket {})",
            self.step_key, self.run_id, self.ticket
        )
    }
}

impl StructuredLog for WaiterAbandoned<'_> {
    fn log(&self) {
        tracing::debug!(
            run_id = self.run_id,
            step_key = self.step_key,
            ticket = self.ticket,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "waiter_abandoned",
            span_name = name,
            run_id = self.run_id,
            ticket = self.ticket,
        )
    }
}

/// Releasing slots failed; the slots stay recorded until the run is freed.
///
/// # Log Level
/// `warn!` - Storage trouble
pub struct SlotReleaseFailed<'a> {
    pub run_id: &'a str,
    pub step_key: Option<&'a str>,
    pub error: &'a dyn std::error::Error,
}

impl Display for SlotReleaseFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Failed to free concurrency slots for run {} (step {:?}): {}",
            self.run_id, self.step_key, self.error
        )
    }
}

impl StructuredLog for SlotReleaseFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            run_id = self.run_id,
            step_key = self.step_key,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "slot_release_failed",
            span_name = name,
            run_id = self.run_id,
            error = %self.error,
        )
    }
}
