// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Step execution failures and the error record attached to failed steps, runs and heartbeats.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure returned by an [`Op`](crate::traits::Op) invocation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    /// The op failed but may succeed if retried.
    #[error("step failed: {error}")]
    Fail { error: String },

    /// The op failed and must not be retried.
    #[error("fatal step failure (no retry): {error}")]
    Fatal { error: String },

    /// The op stopped because its run was canceled.
    #[error("step interrupted by run cancellation")]
    Interrupted,
}

impl StepError {
    pub fn fail(error: impl Into<String>) -> Self {
        StepError::Fail {
            error: error.into(),
        }
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        StepError::Fatal {
            error: error.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            StepError::Fail { .. } => "step_failed",
            StepError::Fatal { .. } => "step_fatal",
            StepError::Interrupted => "step_interrupted",
        }
    }

    /// Only [`StepError::Fail`] is eligible for the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Fail { .. })
    }
}

/// Serializable description of a failure: message, class label and optional context lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl ErrorRecord {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class_name: class_name.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, line: impl Into<String>) -> Self {
        self.context.push(line.into());
        self
    }
}

impl From<&StepError> for ErrorRecord {
    fn from(err: &StepError) -> Self {
        ErrorRecord::new(err.as_label(), err.to_string())
    }
}

impl From<&crate::errors::ValidationError> for ErrorRecord {
    fn from(err: &crate::errors::ValidationError) -> Self {
        ErrorRecord::new(err.as_label(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_failures_are_retryable() {
        assert!(StepError::fail("flaky").is_retryable());
        assert!(!StepError::fatal("broken").is_retryable());
        assert!(!StepError::Interrupted.is_retryable());
    }

    #[test]
    fn error_record_carries_label_and_message() {
        let record = ErrorRecord::from(&StepError::fatal("disk full")).with_context("attempt 2");
        assert_eq!(record.class_name, "step_fatal");
        assert_eq!(record.message, "fatal step failure (no retry): disk full");
        assert_eq!(record.context, vec!["attempt 2".to_string()]);
    }
}
