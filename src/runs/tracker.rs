// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-memory registry of runs and their step executions.
//!
//! The tracker is the single writer of run and step status. Every accepted
//! transition is validated against [`RunStatus::can_transition_to`] /
//! [`StepStatus::can_transition_to`], appended to the run's event log,
//! published on the [`EventBus`] and logged.
//!
//! Each run owns a [`CancellationToken`]. [`RunTracker::request_cancel`] moves
//! the run to CANCELING and cancels the token; the executor observes the token
//! and finishes the teardown.

use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::errors::{ErrorRecord, InstanceError};
use crate::observability::messages::run::{CancellationRequested, RunStatusChanged, StepStatusChanged};
use crate::observability::messages::StructuredLog;
use crate::runs::{EventBus, Run, RunEvent, RunEventKind, RunStatus, RunSummary, StepExecution, StepStatus};

struct RunEntry {
    run: Run,
    step_index: HashMap<String, usize>,
    cancel: CancellationToken,
    status_tx: watch::Sender<RunStatus>,
}

impl RunEntry {
    fn record(&mut self, event: RunEvent, bus: &EventBus) {
        self.run.updated_at = SystemTime::now();
        self.run.events.push(event.clone());
        bus.publish(event);
    }
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, RunEntry>,
    order: Vec<String>,
}

pub struct RunTracker {
    registry: RwLock<Registry>,
    bus: EventBus,
}

impl RunTracker {
    pub fn new(bus: EventBus) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Registers a new QUEUED run and emits PIPELINE_ENQUEUED.
    pub async fn create_run(&self, run_id: &str, job_name: &str) -> Result<(), InstanceError> {
        let mut registry = self.registry.write().await;
        if registry.entries.contains_key(run_id) {
            return Err(InstanceError::Launch {
                run_id: run_id.to_string(),
                reason: "run id already exists".to_string(),
            });
        }

        let (status_tx, _) = watch::channel(RunStatus::Queued);
        let mut entry = RunEntry {
            run: Run::new(run_id, job_name),
            step_index: HashMap::new(),
            cancel: CancellationToken::new(),
            status_tx,
        };
        entry.record(RunEvent::new(run_id, RunEventKind::PipelineEnqueued), &self.bus);

        registry.order.push(run_id.to_string());
        registry.entries.insert(run_id.to_string(), entry);
        Ok(())
    }

    /// Moves a run to `to`, returning the previous status.
    pub async fn transition_run(
        &self,
        run_id: &str,
        to: RunStatus,
        error: Option<ErrorRecord>,
    ) -> Result<RunStatus, InstanceError> {
        let mut registry = self.registry.write().await;
        let entry = entry_mut(&mut registry, run_id)?;
        let from = entry.run.status;
        if !from.can_transition_to(to) {
            return Err(InstanceError::InvalidRunTransition {
                run_id: run_id.to_string(),
                from,
                to,
            });
        }

        entry.run.status = to;
        if error.is_some() {
            entry.run.error = error.clone();
        }

        let kind = match to {
            RunStatus::Queued => RunEventKind::PipelineEnqueued,
            RunStatus::Started => RunEventKind::PipelineStart,
            RunStatus::Canceling => RunEventKind::PipelineCanceling,
            RunStatus::Canceled => RunEventKind::PipelineCanceled,
            RunStatus::Success => RunEventKind::PipelineSuccess,
            RunStatus::Failure => RunEventKind::PipelineFailure,
        };
        let mut event = RunEvent::new(run_id, kind);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        entry.record(event, &self.bus);
        entry.status_tx.send_replace(to);

        RunStatusChanged { run_id, from, to }.log();
        Ok(from)
    }

    /// Adds a QUEUED step execution to a run. Re-adding an existing key is a no-op.
    pub async fn add_step(&self, step: StepExecution) -> Result<(), InstanceError> {
        let mut registry = self.registry.write().await;
        let entry = entry_mut(&mut registry, &step.run_id)?;
        if entry.step_index.contains_key(&step.step_key) {
            return Ok(());
        }
        entry.step_index.insert(step.step_key.clone(), entry.run.steps.len());
        entry.run.steps.push(step);
        entry.run.updated_at = SystemTime::now();
        Ok(())
    }

    /// Moves a step to `to`. Entering RUNNING bumps the attempt counter.
    pub async fn transition_step(
        &self,
        run_id: &str,
        step_key: &str,
        to: StepStatus,
        error: Option<ErrorRecord>,
    ) -> Result<(), InstanceError> {
        let mut registry = self.registry.write().await;
        let entry = entry_mut(&mut registry, run_id)?;
        let idx = *entry
            .step_index
            .get(step_key)
            .ok_or_else(|| InstanceError::StepNotFound {
                run_id: run_id.to_string(),
                step_key: step_key.to_string(),
            })?;

        let step = &mut entry.run.steps[idx];
        let from = step.status;
        if !from.can_transition_to(to) {
            return Err(InstanceError::InvalidStepTransition {
                run_id: run_id.to_string(),
                step_key: step_key.to_string(),
                from,
                to,
            });
        }

        step.status = to;
        if to == StepStatus::Running {
            step.attempt += 1;
        }
        if error.is_some() {
            step.error = error.clone();
        }
        let attempt = step.attempt;

        let kind = match to {
            StepStatus::Running => Some(RunEventKind::StepStart),
            StepStatus::UpForRetry => Some(RunEventKind::StepUpForRetry),
            StepStatus::Restarted => Some(RunEventKind::StepRestarted),
            StepStatus::Success => Some(RunEventKind::StepSuccess),
            StepStatus::Failure => Some(RunEventKind::StepFailure),
            StepStatus::Skipped => Some(RunEventKind::StepSkipped),
            StepStatus::Queued | StepStatus::Starting => None,
        };
        if let Some(kind) = kind {
            let mut event = RunEvent::new(run_id, kind)
                .with_step(step_key)
                .with_attempt(attempt);
            if let Some(error) = error {
                event = event.with_error(error);
            }
            entry.record(event, &self.bus);
        } else {
            entry.run.updated_at = SystemTime::now();
        }

        StepStatusChanged {
            run_id,
            step_key,
            from,
            to,
        }
        .log();
        Ok(())
    }

    /// Marks the run CANCELING and cancels its token.
    ///
    /// Returns `false` when the run is already terminal or already canceling.
    pub async fn request_cancel(&self, run_id: &str) -> Result<bool, InstanceError> {
        let mut registry = self.registry.write().await;
        let entry = entry_mut(&mut registry, run_id)?;
        let previous = entry.run.status;
        if previous.is_terminal() || previous == RunStatus::Canceling {
            return Ok(false);
        }

        entry.run.status = RunStatus::Canceling;
        entry.record(RunEvent::new(run_id, RunEventKind::PipelineCanceling), &self.bus);
        entry.status_tx.send_replace(RunStatus::Canceling);
        entry.cancel.cancel();

        CancellationRequested { run_id, previous }.log();
        RunStatusChanged {
            run_id,
            from: previous,
            to: RunStatus::Canceling,
        }
        .log();
        Ok(true)
    }

    pub async fn can_terminate(&self, run_id: &str) -> Result<bool, InstanceError> {
        let status = self.status(run_id).await?;
        Ok(!status.is_terminal() && status != RunStatus::Canceling)
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus, InstanceError> {
        let registry = self.registry.read().await;
        Ok(entry(&registry, run_id)?.run.status)
    }

    pub async fn cancel_token(&self, run_id: &str) -> Result<CancellationToken, InstanceError> {
        let registry = self.registry.read().await;
        Ok(entry(&registry, run_id)?.cancel.clone())
    }

    pub async fn run(&self, run_id: &str) -> Result<Run, InstanceError> {
        let registry = self.registry.read().await;
        Ok(entry(&registry, run_id)?.run.clone())
    }

    pub async fn events(&self, run_id: &str) -> Result<Vec<RunEvent>, InstanceError> {
        let registry = self.registry.read().await;
        Ok(entry(&registry, run_id)?.run.events.clone())
    }

    /// Summaries of every run in creation order.
    pub async fn runs(&self) -> Vec<RunSummary> {
        self.runs_matching(|_| true).await
    }

    pub async fn queued_runs(&self) -> Vec<RunSummary> {
        self.runs_matching(|s| s == RunStatus::Queued).await
    }

    /// Runs that have started and not yet reached a terminal status.
    pub async fn active_runs(&self) -> Vec<RunSummary> {
        self.runs_matching(|s| matches!(s, RunStatus::Started | RunStatus::Canceling))
            .await
    }

    async fn runs_matching(&self, pred: impl Fn(RunStatus) -> bool) -> Vec<RunSummary> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.entries.get(id))
            .filter(|e| pred(e.run.status))
            .map(|e| e.run.summary())
            .collect()
    }

    /// Resolves once the run reaches a terminal status.
    pub async fn wait_for_terminal(&self, run_id: &str) -> Result<Run, InstanceError> {
        let mut rx = {
            let registry = self.registry.read().await;
            entry(&registry, run_id)?.status_tx.subscribe()
        };
        // The sender lives as long as the entry; a closed channel means it was never terminal.
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.run(run_id).await
    }
}

fn entry<'a>(registry: &'a Registry, run_id: &str) -> Result<&'a RunEntry, InstanceError> {
    registry
        .entries
        .get(run_id)
        .ok_or_else(|| InstanceError::RunNotFound {
            run_id: run_id.to_string(),
        })
}

fn entry_mut<'a>(registry: &'a mut Registry, run_id: &str) -> Result<&'a mut RunEntry, InstanceError> {
    registry
        .entries
        .get_mut(run_id)
        .ok_or_else(|| InstanceError::RunNotFound {
            run_id: run_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn tracker() -> RunTracker {
        RunTracker::new(EventBus::new(64))
    }

    fn kinds(run: &Run) -> Vec<RunEventKind> {
        run.events.iter().map(|e| e.kind).collect()
    }

    #[tokio::test]
    async fn step_lifecycle_produces_events() {
        let t = tracker();
        t.create_run("r1", "job").await.unwrap();
        t.transition_run("r1", RunStatus::Started, None).await.unwrap();
        t.add_step(StepExecution::new("r1", "a", "a")).await.unwrap();

        for status in [StepStatus::Starting, StepStatus::Running, StepStatus::Success] {
            t.transition_step("r1", "a", status, None).await.unwrap();
        }
        t.transition_run("r1", RunStatus::Success, None).await.unwrap();

        let run = t.run("r1").await.unwrap();
        assert_eq!(
            kinds(&run),
            vec![
                RunEventKind::PipelineEnqueued,
                RunEventKind::PipelineStart,
                RunEventKind::StepStart,
                RunEventKind::StepSuccess,
                RunEventKind::PipelineSuccess,
            ]
        );
        assert_eq!(run.step("a").unwrap().attempt, 1);
        assert!(run.events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let t = tracker();
        t.create_run("r1", "job").await.unwrap();
        t.add_step(StepExecution::new("r1", "a", "a")).await.unwrap();

        let err = t
            .transition_step("r1", "a", StepStatus::Success, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InstanceError::InvalidStepTransition { .. }));

        t.transition_run("r1", RunStatus::Failure, None).await.unwrap();
        let err = t
            .transition_run("r1", RunStatus::Started, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InstanceError::InvalidRunTransition { .. }));

        let err = t.run("missing").await.unwrap_err();
        assert!(matches!(err, InstanceError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_is_requested_once() {
        let t = tracker();
        t.create_run("r1", "job").await.unwrap();
        t.transition_run("r1", RunStatus::Started, None).await.unwrap();
        let token = t.cancel_token("r1").await.unwrap();

        assert!(t.can_terminate("r1").await.unwrap());
        assert!(t.request_cancel("r1").await.unwrap());
        assert!(token.is_cancelled());
        assert!(!t.can_terminate("r1").await.unwrap());
        assert!(!t.request_cancel("r1").await.unwrap());

        t.transition_run("r1", RunStatus::Canceled, None).await.unwrap();
        let run = t.run("r1").await.unwrap();
        let canceling = kinds(&run)
            .into_iter()
            .filter(|k| *k == RunEventKind::PipelineCanceling)
            .count();
        assert_eq!(canceling, 1);
        assert_eq!(run.status, RunStatus::Canceled);
    }

    #[tokio::test]
    async fn wait_for_terminal_resolves_on_completion() {
        let t = Arc::new(tracker());
        t.create_run("r1", "job").await.unwrap();

        let waiter = {
            let t = t.clone();
            tokio::spawn(async move { t.wait_for_terminal("r1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        t.transition_run("r1", RunStatus::Started, None).await.unwrap();
        t.transition_run("r1", RunStatus::Success, None).await.unwrap();

        let run = waiter.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn active_and_queued_views() {
        let t = tracker();
        t.create_run("a", "job").await.unwrap();
        t.create_run("b", "job").await.unwrap();
        t.transition_run("b", RunStatus::Started, None).await.unwrap();

        let queued: Vec<_> = t.queued_runs().await.into_iter().map(|r| r.run_id).collect();
        let active: Vec<_> = t.active_runs().await.into_iter().map(|r| r.run_id).collect();
        assert_eq!(queued, vec!["a"]);
        assert_eq!(active, vec!["b"]);
        assert_eq!(t.runs().await.len(), 2);
    }
}
