// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The instance facade: one handle over the ledger, admission controller, run
//! tracker, launcher, heartbeat store and settings store.
//!
//! # Run lifecycle through the facade
//!
//! ```text
//! submit_run(job) ──► QUEUED ──► launch_run ──► launcher ──► executor ──► terminal
//!                       │                                       ▲
//!                       └── terminate_run (never launched) ─────┴── CANCELED
//! ```
//!
//! `execute_run` skips the launcher and drives the run on the caller's task, returning
//! the op outputs. `terminate_run` goes through the launcher for launched runs; a run
//! that was never launched has no executor to observe its token, so it is moved to
//! CANCELED directly.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use crate::concurrency::{AdmissionController, ConcurrencyLedger, ConcurrencyStore};
use crate::config::consts::{DEFAULT_BUS_CAPACITY, FALLBACK_MAX_CONCURRENCY};
use crate::engine::{RunExecutor, RunOutcome};
use crate::errors::{ErrorRecord, InstanceError};
use crate::graph::JobGraph;
use crate::instance::daemon::{DaemonHeartbeat, HeartbeatStore};
use crate::instance::launcher::InProcessRunLauncher;
use crate::instance::reporter::StatusReporter;
use crate::instance::settings::{self, InMemorySettingsStore, SettingsStore};
use crate::instance::JobMap;
use crate::observability::messages::engine::ExecutionFailed;
use crate::observability::messages::StructuredLog;
use crate::runs::{EventBus, RetryPolicy, Run, RunStatus, RunTracker};
use crate::traits::RunLauncher;

/// Construction options for an [`Instance`].
pub struct InstanceOptions {
    pub bus_capacity: usize,
    pub retry_policy: RetryPolicy,
    pub max_concurrency: usize,
    pub heartbeats: HeartbeatStore,
    pub settings: Arc<dyn SettingsStore>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            retry_policy: RetryPolicy::never(),
            max_concurrency: FALLBACK_MAX_CONCURRENCY,
            heartbeats: HeartbeatStore::default(),
            settings: Arc::new(InMemorySettingsStore::new()),
        }
    }
}

pub struct Instance {
    store: Arc<dyn ConcurrencyStore>,
    admission: Arc<AdmissionController>,
    tracker: Arc<RunTracker>,
    executor: RunExecutor,
    launcher: Arc<dyn RunLauncher>,
    heartbeats: Arc<HeartbeatStore>,
    settings: Arc<dyn SettingsStore>,
    jobs: RwLock<JobMap>,
    launched: Mutex<HashSet<String>>,
}

impl Instance {
    /// In-memory ledger with default options.
    pub fn ephemeral() -> Self {
        Self::new(Arc::new(ConcurrencyLedger::in_memory()), InstanceOptions::default())
    }

    pub fn new(store: Arc<dyn ConcurrencyStore>, options: InstanceOptions) -> Self {
        let tracker = Arc::new(RunTracker::new(EventBus::new(options.bus_capacity)));
        let admission = Arc::new(AdmissionController::new(store.clone()));
        let executor = RunExecutor::new(tracker.clone(), admission.clone())
            .with_retry_policy(options.retry_policy)
            .with_max_concurrency(options.max_concurrency);
        let launcher: Arc<dyn RunLauncher> = Arc::new(InProcessRunLauncher::new(executor.clone()));

        Self {
            store,
            admission,
            tracker,
            executor,
            launcher,
            heartbeats: Arc::new(options.heartbeats),
            settings: options.settings,
            jobs: RwLock::new(JobMap::new()),
            launched: Mutex::new(HashSet::new()),
        }
    }

    /// Replaces the in-process launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn RunLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConcurrencyStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    pub fn event_bus(&self) -> &EventBus {
        self.tracker.bus()
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatStore> {
        &self.heartbeats
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(
            self.store.clone(),
            self.tracker.clone(),
            self.heartbeats.clone(),
            self.settings.clone(),
            self.launcher.name(),
        )
    }

    // ---- jobs ----

    pub fn register_job(&self, job: JobGraph) -> Arc<JobGraph> {
        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job)
    }

    pub fn job(&self, name: &str) -> Result<Arc<JobGraph>, InstanceError> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| InstanceError::JobNotFound {
                job_name: name.to_string(),
            })
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .names()
            .map(str::to_string)
            .collect()
    }

    // ---- runs ----

    /// Records a QUEUED run of a registered job and returns its id.
    pub async fn submit_run(&self, job_name: &str) -> Result<String, InstanceError> {
        self.job(job_name)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        self.tracker.create_run(&run_id, job_name).await?;
        Ok(run_id)
    }

    /// Hands a QUEUED run to the launcher.
    ///
    /// A run the launcher refuses is moved to FAILURE with the launch error, since no
    /// executor will ever drive it.
    pub async fn launch_run(&self, run_id: &str) -> Result<(), InstanceError> {
        let run = self.tracker.run(run_id).await?;
        let job = self.job(&run.job_name)?;
        self.mark_launched(run_id)?;

        let Err(err) = self.launcher.launch(&run, job).await else {
            return Ok(());
        };
        ExecutionFailed {
            run_id,
            error: &err,
        }
        .log();
        self.unmark_launched(run_id);
        let record = ErrorRecord::new(err.as_label(), err.to_string())
            .with_context(format!("launcher: {}", self.launcher.name()));
        match self
            .tracker
            .transition_run(run_id, RunStatus::Failure, Some(record))
            .await
        {
            // already terminal, e.g. terminated before the launch
            Ok(_) | Err(InstanceError::InvalidRunTransition { .. }) => {}
            Err(other) => return Err(other),
        }
        Err(err)
    }

    /// Submits and launches in one call.
    pub async fn launch_job(&self, job_name: &str) -> Result<String, InstanceError> {
        let run_id = self.submit_run(job_name).await?;
        self.launch_run(&run_id).await?;
        Ok(run_id)
    }

    /// Drives a QUEUED run to completion on the current task.
    pub async fn execute_run(&self, run_id: &str) -> Result<RunOutcome, InstanceError> {
        let run = self.tracker.run(run_id).await?;
        let job = self.job(&run.job_name)?;
        self.mark_launched(run_id)?;
        self.executor.execute(run_id, job).await
    }

    pub async fn wait_for_run(&self, run_id: &str) -> Result<Run, InstanceError> {
        self.tracker.wait_for_terminal(run_id).await
    }

    pub async fn can_terminate(&self, run_id: &str) -> Result<bool, InstanceError> {
        self.tracker.can_terminate(run_id).await
    }

    /// Requests termination. `false` when the run is terminal or already canceling.
    pub async fn terminate_run(&self, run_id: &str) -> Result<bool, InstanceError> {
        if !self.tracker.can_terminate(run_id).await? {
            return Ok(false);
        }
        if self.is_launched(run_id) {
            return self.launcher.terminate(run_id).await;
        }

        if !self.tracker.request_cancel(run_id).await? {
            return Ok(false);
        }
        // The launch may have raced this request; the executor then finishes the cancel.
        if !self.is_launched(run_id) {
            match self
                .tracker
                .transition_run(run_id, RunStatus::Canceled, None)
                .await
            {
                Ok(_) | Err(InstanceError::InvalidRunTransition { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    fn mark_launched(&self, run_id: &str) -> Result<(), InstanceError> {
        let mut launched = self
            .launched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !launched.insert(run_id.to_string()) {
            return Err(InstanceError::Launch {
                run_id: run_id.to_string(),
                reason: "run was already launched".to_string(),
            });
        }
        Ok(())
    }

    fn unmark_launched(&self, run_id: &str) {
        self.launched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(run_id);
    }

    fn is_launched(&self, run_id: &str) -> bool {
        self.launched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(run_id)
    }

    // ---- administration ----

    /// Sets a key's limit; waiters on the key re-check capacity. 0 clears the limit.
    pub fn set_concurrency_limit(&self, key: &str, limit: i64) -> Result<(), InstanceError> {
        self.admission.set_concurrency_limit(key, limit)?;
        Ok(())
    }

    pub fn set_auto_materialize_paused(&self, paused: bool) {
        settings::set_auto_materialize_paused(self.settings.as_ref(), paused);
    }

    pub fn record_heartbeat(&self, heartbeat: DaemonHeartbeat) {
        self.heartbeats.record_heartbeat(heartbeat);
    }
}
