// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Execution of one run of a job graph.

pub mod context;
pub mod executor;


pub use context::StepContext;
pub use executor::{RunExecutor, RunOutcome};
