// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for job graph validation failures.
//!
//! This module contains message types for logging events related to:
//! * Build-time structural errors in a job graph
//! * Expansion-time errors (zip count mismatch, bad mapping keys)

use crate::errors::ValidationError;
use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A job graph failed validation while being built.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct JobValidationFailed<'a> {
    pub job_name: &'a str,
    pub errors: &'a [ValidationError],
}

impl Display for JobValidationFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Job '{}' failed validation with {} error(s)",
            self.job_name,
            self.errors.len()
        )?;
        for error in self.errors {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl StructuredLog for JobValidationFailed<'_> {
    fn log(&self) {
        tracing::error!(
            job_name = self.job_name,
            error_count = self.errors.len(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::ERROR,
            "job_validation",
            name = name,
            job_name = self.job_name,
            error_count = self.errors.len(),
        )
    }
}

/// Upstream emissions could not be expanded into downstream steps.
///
/// # Log Level
/// `error!` - Fails the run before the downstream op executes
///
/// # Example
/// ```
/// use the_runwood::errors::ValidationError;
/// use the_runwood::observability::messages::validation::ExpansionFailed;
///
/// let error = ValidationError::ZipCountMismatch {
///     step_key: "combine".into(),
///     counts: vec![("bases.result".into(), 5), ("multipliers.result".into(), 3)],
/// };
/// let msg = ExpansionFailed { run_id: "run-1", error: &error };
///
/// tracing::error!("{}", msg);
/// ```
pub struct ExpansionFailed<'a> {
    pub run_id: &'a str,
    pub error: &'a ValidationError,
}

impl Display for ExpansionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Run {}: {}", self.run_id, self.error)
    }
}

impl StructuredLog for ExpansionFailed<'_> {
    fn log(&self) {
        tracing::error!(
            run_id = self.run_id,
            error_kind = self.error.as_label(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::span!(
            tracing::Level::ERROR,
            "expansion_failed",
            name = name,
            run_id = self.run_id,
            error_kind = self.error.as_label(),
        )
    }
}
