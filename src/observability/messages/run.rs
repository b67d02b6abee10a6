// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for run and step lifecycle transitions.

use crate::observability::messages::StructuredLog;
use crate::runs::{RunStatus, StepStatus};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// Run moved to a new status.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use the_runwood::observability::messages::run::RunStatusChanged;
/// use the_runwood::runs::RunStatus;
///
/// let msg = RunStatusChanged {
///     run_id: "run-1",
///     from: RunStatus::Queued,
///     to: RunStatus::Started,
/// };
///
/// assert_eq!(msg.to_string(), "Run run-1: QUEUED -> STARTED");
/// ```
pub struct RunStatusChanged<'a> {
    pub run_id: &'a str,
    pub from: RunStatus,
    pub to: RunStatus,
}

impl Display for RunStatusChanged<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Run {}: {} -> {}", self.run_id, self.from, self.to)
    }
}

impl StructuredLog for RunStatusChanged<'_> {
    fn log(&self) {
        tracing::info!(
            run_id = self.run_id,
            from = %self.from,
            to = %self.to,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run_status_changed",
            span_name = name,
            run_id = self.run_id,
            to = %self.to,
        )
    }
}

/// Step moved to a new status.
///
/// # Log Level
/// `debug!` for intermediate states, `info!` for terminal ones
pub struct StepStatusChanged<'a> {
    pub run_id: &'a str,
    pub step_key: &'a str,
    pub from: StepStatus,
    pub to: StepStatus,
}

impl Display for StepStatusChanged<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Step '{}' of run {}: {} -> {}",
            self.step_key, self.run_id, self.from, self.to
        )
    }
}

impl StructuredLog for StepStatusChanged<'_> {
    fn log(&self) {
        if self.to.is_terminal() {
            tracing::info!(
                run_id = self.run_id,
                step_key = self.step_key,
                from = %self.from,
                to = %self.to,
                "{}", self
            );
        } else {
            tracing::debug!(
                run_id = self.run_id,
                step_key = self.step_key,
                from = %self.from,
                to = %self.to,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "step",
            span_name = name,
            run_id = self.run_id,
            step_key = self.step_key,
        )
    }
}

/// A failed step will be retried after a delay.
///
/// # Log Level
/// `warn!` - Recoverable failure
pub struct StepRetryScheduled<'a> {
    pub run_id: &'a str,
    pub step_key: &'a str,
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a str,
}

impl Display for StepRetryScheduled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Step '{}' of run {} failed on attempt {} ({}); retrying in {:?}",
            self.step_key, self.run_id, self.attempt, self.error, self.delay
        )
    }
}

impl StructuredLog for StepRetryScheduled<'_> {
    fn log(&self) {
        tracing::warn!(
            run_id = self.run_id,
            step_key = self.step_key,
            attempt = self.attempt,
            delay_ms = self.delay.as_millis() as u64,
            error = self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "step_retry",
            span_name = name,
            run_id = self.run_id,
            step_key = self.step_key,
            attempt = self.attempt,
        )
    }
}

/// Termination of a run was requested.
///
/// # Log Level
/// `info!`
pub struct CancellationRequested<'a> {
    pub run_id: &'a str,
    pub previous: RunStatus,
}

impl Display for CancellationRequested<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Cancellation requested for run {} (was {})",
            self.run_id, self.previous
        )
    }
}

impl StructuredLog for CancellationRequested<'_> {
    fn log(&self) {
        tracing::info!(
            run_id = self.run_id,
            previous = %self.previous,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("run_cancellation", span_name = name, run_id = self.run_id)
    }
}

/// A run was handed to a launcher.
///
/// # Log Level
/// `info!`
pub struct RunLaunched<'a> {
    pub run_id: &'a str,
    pub job_name: &'a str,
    pub launcher: &'a str,
}

impl Display for RunLaunched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Launched run {} of job '{}' with {}",
            self.run_id, self.job_name, self.launcher
        )
    }
}

impl StructuredLog for RunLaunched<'_> {
    fn log(&self) {
        tracing::info!(
            run_id = self.run_id,
            job_name = self.job_name,
            launcher = self.launcher,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run_launch",
            span_name = name,
            run_id = self.run_id,
            job_name = self.job_name,
        )
    }
}
