// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::InstanceError;
use crate::graph::JobGraph;
use crate::runs::Run;

/// Starts and stops the execution of submitted runs.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    /// Shown in status reports.
    fn name(&self) -> &str;

    /// Begins executing a QUEUED run. Returns once the run has been handed off.
    async fn launch(&self, run: &Run, job: Arc<JobGraph>) -> Result<(), InstanceError>;

    /// Requests termination. `false` when the run cannot be terminated (terminal or already canceling).
    async fn terminate(&self, run_id: &str) -> Result<bool, InstanceError>;
}
