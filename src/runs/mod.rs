// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run/step state machine.
//!
//! * [`status`] - run and step statuses with their legal transitions
//! * [`records`] - the [`Run`] and [`StepExecution`] records
//! * [`events`] - [`RunEvent`]s and the broadcast [`EventBus`]
//! * [`tracker`] - [`RunTracker`], the single writer of run state
//! * [`retry`] - [`RetryPolicy`] applied to failed steps

pub mod events;
pub mod records;
pub mod retry;
pub mod status;
pub mod tracker;

pub use events::{EventBus, RunEvent, RunEventKind};
pub use records::{Run, RunSummary, StepExecution};
pub use retry::{BackoffPolicy, RetryPolicy};
pub use status::{RunStatus, StepStatus};
pub use tracker::RunTracker;
