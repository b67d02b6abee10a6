// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod daemon;
mod facade;
mod job_map;
mod launcher;
pub mod reporter;
pub mod settings;

#[cfg(test)]
mod integration_tests;

pub use daemon::{DaemonHeartbeat, DaemonStatus, HeartbeatStore};
pub use facade::{Instance, InstanceOptions};
pub use job_map::JobMap;
pub use launcher::InProcessRunLauncher;
pub use reporter::{ConcurrencyLimit, InstanceSnapshot, StatusReporter};
pub use settings::{InMemorySettingsStore, SettingsStore};
