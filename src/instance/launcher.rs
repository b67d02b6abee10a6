// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::RunExecutor;
use crate::errors::InstanceError;
use crate::graph::JobGraph;
use crate::observability::messages::engine::ExecutionFailed;
use crate::observability::messages::run::RunLaunched;
use crate::observability::messages::StructuredLog;
use crate::runs::{Run, RunStatus};
use crate::traits::RunLauncher;

/// Executes runs as tasks on the current tokio runtime.
#[derive(Clone)]
pub struct InProcessRunLauncher {
    executor: RunExecutor,
}

impl InProcessRunLauncher {
    pub fn new(executor: RunExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl RunLauncher for InProcessRunLauncher {
    fn name(&self) -> &str {
        "InProcessRunLauncher"
    }

    async fn launch(&self, run: &Run, job: Arc<JobGraph>) -> Result<(), InstanceError> {
        if run.status != RunStatus::Queued {
            return Err(InstanceError::Launch {
                run_id: run.run_id.clone(),
                reason: format!("run is {}, only QUEUED runs can be launched", run.status),
            });
        }

        RunLaunched {
            run_id: &run.run_id,
            job_name: &run.job_name,
            launcher: self.name(),
        }
        .log();

        let executor = self.executor.clone();
        let run_id = run.run_id.clone();
        tokio::spawn(async move {
            if let Err(err) = executor.execute(&run_id, job).await {
                ExecutionFailed {
                    run_id: &run_id,
                    error: &err,
                }
                .log();
            }
        });
        Ok(())
    }

    async fn terminate(&self, run_id: &str) -> Result<bool, InstanceError> {
        self.executor.tracker().request_cancel(run_id).await
    }
}
