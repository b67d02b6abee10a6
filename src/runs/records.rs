// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run and step execution records as held by the tracker.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::errors::ErrorRecord;
use crate::runs::{RunEvent, RunStatus, StepStatus};

/// One concrete invocation of an op inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub run_id: String,
    pub step_key: String,
    pub op_name: String,
    pub status: StepStatus,
    pub concurrency_keys: Vec<String>,
    /// Number of times the step entered RUNNING.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl StepExecution {
    pub fn new(run_id: impl Into<String>, step_key: impl Into<String>, op_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            step_key: step_key.into(),
            op_name: op_name.into(),
            status: StepStatus::Queued,
            concurrency_keys: Vec::new(),
            attempt: 0,
            mapping_key: None,
            error: None,
        }
    }

    pub fn with_concurrency_keys(mut self, keys: Vec<String>) -> Self {
        self.concurrency_keys = keys;
        self
    }

    pub fn with_mapping_key(mut self, mapping_key: Option<String>) -> Self {
        self.mapping_key = mapping_key;
        self
    }
}

/// A run of a job and everything recorded about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub steps: Vec<StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<RunEvent>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            run_id: run_id.into(),
            job_name: job_name.into(),
            status: RunStatus::Queued,
            steps: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        }
    }

    pub fn step(&self, step_key: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_key == step_key)
    }

    /// Steps currently in `status`.
    pub fn steps_with_status(&self, status: StepStatus) -> impl Iterator<Item = &StepExecution> {
        self.steps.iter().filter(move |s| s.status == status)
    }

    /// Status a run reaches once all its steps are terminal and no cancellation was requested.
    pub fn outcome(&self) -> RunStatus {
        if self.error.is_some() || self.steps.iter().any(|s| s.status == StepStatus::Failure) {
            RunStatus::Failure
        } else {
            RunStatus::Success
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            job_name: self.job_name.clone(),
            status: self.status,
            step_count: self.steps.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Compact view of a run used by status reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub step_count: usize,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}
