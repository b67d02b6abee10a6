// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run and step lifecycle events and the broadcast bus that carries them.
//!
//! Every status transition recorded by the [`RunTracker`](crate::runs::RunTracker)
//! produces one [`RunEvent`]. The event is appended to the run's own log and then
//! published on the [`EventBus`].
//!
//! ## Ordering
//! Each event takes a sequence number from one process-wide counter, so `seq`
//! orders events across runs even when a subscriber sees them late.
//!
//! ## Bus behavior
//! - `publish()` never blocks; with no subscribers the event is simply dropped.
//! - Capacity is shared by all receivers; a slow receiver gets `RecvError::Lagged(n)`.
//! - The per-run log in the tracker is the durable record, the bus is fire-and-forget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::broadcast;

use crate::errors::ErrorRecord;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEventKind {
    PipelineEnqueued,
    PipelineStart,
    PipelineSuccess,
    PipelineFailure,
    PipelineCanceling,
    PipelineCanceled,
    StepStart,
    StepUpForRetry,
    StepRestarted,
    StepSuccess,
    StepFailure,
    StepSkipped,
}

impl RunEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunEventKind::PipelineEnqueued => "PIPELINE_ENQUEUED",
            RunEventKind::PipelineStart => "PIPELINE_START",
            RunEventKind::PipelineSuccess => "PIPELINE_SUCCESS",
            RunEventKind::PipelineFailure => "PIPELINE_FAILURE",
            RunEventKind::PipelineCanceling => "PIPELINE_CANCELING",
            RunEventKind::PipelineCanceled => "PIPELINE_CANCELED",
            RunEventKind::StepStart => "STEP_START",
            RunEventKind::StepUpForRetry => "STEP_UP_FOR_RETRY",
            RunEventKind::StepRestarted => "STEP_RESTARTED",
            RunEventKind::StepSuccess => "STEP_SUCCESS",
            RunEventKind::StepFailure => "STEP_FAILURE",
            RunEventKind::StepSkipped => "STEP_SKIPPED",
        }
    }

    /// True for the events that close a run.
    pub fn is_run_terminal(self) -> bool {
        matches!(
            self,
            RunEventKind::PipelineSuccess
                | RunEventKind::PipelineFailure
                | RunEventKind::PipelineCanceled
        )
    }
}

impl fmt::Display for RunEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a run's event log.
///
/// ```
/// use the_runwood::runs::{RunEvent, RunEventKind};
///
/// let ev = RunEvent::new("run-1", RunEventKind::StepStart)
///     .with_step("add_two[base_0]")
///     .with_attempt(1);
///
/// assert_eq!(ev.step_key.as_deref(), Some("add_two[base_0]"));
/// assert_eq!(ev.kind.to_string(), "STEP_START");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64,
    pub at: SystemTime,
    pub run_id: String,
    pub kind: RunEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl RunEvent {
    pub fn new(run_id: impl Into<String>, kind: RunEventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            run_id: run_id.into(),
            kind,
            step_key: None,
            attempt: None,
            error: None,
        }
    }

    pub fn with_step(mut self, step_key: impl Into<String>) -> Self {
        self.step_key = Some(step_key.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error(mut self, error: ErrorRecord) -> Self {
        self.error = Some(error);
        self
    }
}

/// Broadcast channel for [`RunEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, ev: RunEvent) {
        let _ = self.tx.send(ev);
    }

    /// A receiver only observes events published after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::consts::DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = RunEvent::new("r", RunEventKind::PipelineEnqueued);
        let b = RunEvent::new("r", RunEventKind::PipelineStart);
        assert!(b.seq > a.seq);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::new("run-7", RunEventKind::PipelineCanceling));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.run_id, "run-7");
        assert_eq!(ev.kind, RunEventKind::PipelineCanceling);
        assert!(!ev.kind.is_run_terminal());
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(0);
        bus.publish(RunEvent::new("r", RunEventKind::PipelineSuccess));
    }
}
