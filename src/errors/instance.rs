// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::errors::{ConcurrencyError, ValidationError};
use crate::runs::{RunStatus, StepStatus};

/// Errors surfaced by the run tracker, reporter and instance facade.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("daemon type '{daemon_type}' is not registered")]
    DaemonNotFound { daemon_type: String },

    #[error("run '{run_id}' not found")]
    RunNotFound { run_id: String },

    #[error("step '{step_key}' not found in run '{run_id}'")]
    StepNotFound { run_id: String, step_key: String },

    #[error("job '{job_name}' is not registered")]
    JobNotFound { job_name: String },

    #[error("run '{run_id}' cannot move from {from:?} to {to:?}")]
    InvalidRunTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("step '{step_key}' of run '{run_id}' cannot move from {from:?} to {to:?}")]
    InvalidStepTransition {
        run_id: String,
        step_key: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("failed to launch run '{run_id}': {reason}")]
    Launch { run_id: String, reason: String },

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl InstanceError {
    pub fn as_label(&self) -> &'static str {
        match self {
            InstanceError::DaemonNotFound { .. } => "daemon_not_found",
            InstanceError::RunNotFound { .. } => "run_not_found",
            InstanceError::StepNotFound { .. } => "step_not_found",
            InstanceError::JobNotFound { .. } => "job_not_found",
            InstanceError::InvalidRunTransition { .. } => "invalid_run_transition",
            InstanceError::InvalidStepTransition { .. } => "invalid_step_transition",
            InstanceError::Launch { .. } => "launch_failed",
            InstanceError::Concurrency(e) => e.as_label(),
            InstanceError::Validation(e) => e.as_label(),
        }
    }
}
