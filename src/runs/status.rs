// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run and step statuses and the transitions allowed between them.
//!
//! ```text
//! Run:   QUEUED ──► STARTED ──► SUCCESS | FAILURE
//!          │           │
//!          │           └──► CANCELING ──► CANCELED | FAILURE
//!          └──► CANCELING | CANCELED | FAILURE
//!
//! Step:  QUEUED ──► STARTING ──► RUNNING ──► SUCCESS | FAILURE
//!                                   │  ▲
//!                                   ▼  │
//!                          UP_FOR_RETRY ──► RESTARTED
//!
//!        any non-terminal ──► SKIPPED
//!        STARTING | UP_FOR_RETRY | RESTARTED ──► FAILURE (interrupted)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Started,
    Canceling,
    Canceled,
    Success,
    Failure,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Canceled | RunStatus::Success | RunStatus::Failure
        )
    }

    /// Transitions are monotonic; the only branch out of CANCELING is to a terminal state.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Queued, Started | Canceling | Canceled | Failure) => true,
            (Started, Canceling | Success | Failure) => true,
            (Canceling, Canceled | Failure) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Started => "STARTED",
            RunStatus::Canceling => "CANCELING",
            RunStatus::Canceled => "CANCELED",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Queued,
    Starting,
    Running,
    UpForRetry,
    Restarted,
    Success,
    Failure,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failure | StepStatus::Skipped
        )
    }

    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Skipped) => true,
            (Queued, Starting) => true,
            (Starting, Running | Failure) => true,
            (Running, Success | Failure | UpForRetry) => true,
            (UpForRetry, Restarted | Failure) => true,
            (Restarted, Running | Failure) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Queued => "QUEUED",
            StepStatus::Starting => "STARTING",
            StepStatus::Running => "RUNNING",
            StepStatus::UpForRetry => "UP_FOR_RETRY",
            StepStatus::Restarted => "RESTARTED",
            StepStatus::Success => "SUCCESS",
            StepStatus::Failure => "FAILURE",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_runs_are_immutable() {
        for terminal in [RunStatus::Canceled, RunStatus::Success, RunStatus::Failure] {
            for next in [
                RunStatus::Queued,
                RunStatus::Started,
                RunStatus::Canceling,
                RunStatus::Canceled,
                RunStatus::Success,
                RunStatus::Failure,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn canceling_only_resolves_to_canceled_or_failure() {
        assert!(RunStatus::Canceling.can_transition_to(RunStatus::Canceled));
        assert!(RunStatus::Canceling.can_transition_to(RunStatus::Failure));
        assert!(!RunStatus::Canceling.can_transition_to(RunStatus::Success));
        assert!(!RunStatus::Canceling.can_transition_to(RunStatus::Started));
        assert!(!RunStatus::Started.can_transition_to(RunStatus::Canceled));
    }

    #[test]
    fn retry_loop_is_allowed() {
        use StepStatus::*;
        let path = [Queued, Starting, Running, UpForRetry, Restarted, Running, Success];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Queued.can_transition_to(Running));
        assert!(!Success.can_transition_to(Skipped));
        assert!(Running.can_transition_to(Skipped));
    }

    #[test]
    fn statuses_serialize_screaming_snake_case() {
        let json = serde_json::to_string(&StepStatus::UpForRetry).unwrap();
        assert_eq!(json, "\"UP_FOR_RETRY\"");
        assert_eq!(RunStatus::Canceling.to_string(), "CANCELING");
    }
}
