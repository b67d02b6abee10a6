// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for run executor lifecycle and execution events.
//!
//! This module contains message types for logging events related to:
//! * Run execution lifecycle (start, completion, failure)
//! * Expansion of graph nodes into step executions

use crate::observability::messages::StructuredLog;
use crate::runs::RunStatus;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// Execution of a run started.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use the_runwood::observability::messages::engine::ExecutionStarted;
///
/// let msg = ExecutionStarted {
///     run_id: "run-1",
///     job_name: "basic_example",
///     node_count: 3,
///     max_concurrency: 4,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct ExecutionStarted<'a> {
    pub run_id: &'a str,
    pub job_name: &'a str,
    pub node_count: usize,
    pub max_concurrency: usize,
}

impl Display for ExecutionStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting run {} of job '{}': {} ops, max_concurrency={}",
            self.run_id, self.job_name, self.node_count, self.max_concurrency
        )
    }
}

impl StructuredLog for ExecutionStarted<'_> {
    fn log(&self) {
        tracing::info!(
            run_id = self.run_id,
            job_name = self.job_name,
            node_count = self.node_count,
            max_concurrency = self.max_concurrency,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution",
            span_name = name,
            run_id = self.run_id,
            job_name = self.job_name,
            node_count = self.node_count,
            max_concurrency = self.max_concurrency,
        )
    }
}

/// Execution of a run finished (any terminal status).
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionCompleted<'a> {
    pub run_id: &'a str,
    pub job_name: &'a str,
    pub status: RunStatus,
    pub step_count: usize,
    pub duration: std::time::Duration,
}

impl Display for ExecutionCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Run {} of job '{}' finished with {}: {} steps in {:?}",
            self.run_id, self.job_name, self.status, self.step_count, self.duration
        )
    }
}

impl StructuredLog for ExecutionCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            run_id = self.run_id,
            job_name = self.job_name,
            status = %self.status,
            step_count = self.step_count,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "execution_completed",
            span_name = name,
            run_id = self.run_id,
            status = %self.status,
            duration = ?self.duration,
        )
    }
}

/// Execution of a run hit an error outside of any single step.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct ExecutionFailed<'a> {
    pub run_id: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for ExecutionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Run {} failed: {}", self.run_id, self.error)
    }
}

impl StructuredLog for ExecutionFailed<'_> {
    fn log(&self) {
        tracing::error!(
            run_id = self.run_id,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "execution_failed",
            span_name = name,
            run_id = self.run_id,
            error = %self.error,
        )
    }
}

/// A graph node was expanded into concrete step executions.
///
/// # Log Level
/// `debug!`
pub struct NodeExpanded<'a> {
    pub run_id: &'a str,
    pub op_name: &'a str,
    pub step_count: usize,
}

impl Display for NodeExpanded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Run {}: op '{}' expanded into {} step(s)",
            self.run_id, self.op_name, self.step_count
        )
    }
}

impl StructuredLog for NodeExpanded<'_> {
    fn log(&self) {
        tracing::debug!(
            run_id = self.run_id,
            op_name = self.op_name,
            step_count = self.step_count,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "node_expanded",
            span_name = name,
            run_id = self.run_id,
            op_name = self.op_name,
        )
    }
}
