// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod concurrency;
mod config;
mod execution;
mod instance;
mod validation;

pub use concurrency::ConcurrencyError;
pub use config::ConfigError;
pub use execution::{ErrorRecord, StepError};
pub use instance::InstanceError;
pub use validation::ValidationError;
