// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Concurrency slots: the [`ledger`] that records limits and holders, and the
//! [`admission`] controller that makes steps wait for a slot in FIFO order.

pub mod admission;
pub mod ledger;

#[cfg(test)]
mod integration_tests;

pub use admission::{AdmissionController, SlotHandle};
pub use ledger::{ConcurrencyLedger, ConcurrencyStore, SlotInfo};
