// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run executor with node-level dependency counting and slot admission.
//!
//! # Execution Flow
//!
//! 1. **Start**: move the run QUEUED -> STARTED. A run that was canceled before
//!    it started goes straight to CANCELED.
//! 2. **Initialization**: count the distinct upstream nodes of every node; nodes
//!    with a count of zero are ready.
//! 3. **Expansion**: a ready node is expanded into steps using the outputs of its
//!    upstream nodes (see [`expansion`](crate::graph::expansion)). Each step is
//!    recorded QUEUED and spawned as its own task.
//! 4. **Completion**: when every step of a node succeeded, the node's outputs are
//!    stored and its downstream counts are decremented. A node with a failed step
//!    never releases its dependents.
//! 5. **Teardown**: nodes that never became ready are recorded SKIPPED, any slot
//!    still held by the run is freed, and the run reaches its terminal status.
//!
//! # Step lifecycle
//!
//! ```text
//! QUEUED ─► STARTING ─(slots, run permit)─► RUNNING ─► SUCCESS
//!                                              │
//!                                              ├─► FAILURE (no retry left, fatal, interrupted)
//!                                              └─► UP_FOR_RETRY ─(backoff)─► RESTARTED ─(slots, run permit)─► RUNNING
//! ```
//!
//! The run permit is taken only once the slots are claimed, so steps waiting on a
//! concurrency key do not count against `max_concurrency`. Slots and permit are
//! released before the step's terminal event is published, and during the backoff
//! wait of a retry.
//!
//! # Cancellation
//!
//! Every await point of a step races the run's cancellation token. A step that
//! whose op never ran is SKIPPED, a started one fails as interrupted. The executor
//! stops expanding nodes, waits for in-flight steps, frees the run's slots, and
//! only then publishes PIPELINE_CANCELED.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::concurrency::{AdmissionController, SlotHandle};
use crate::config::consts::FALLBACK_MAX_CONCURRENCY;
use crate::engine::StepContext;
use crate::errors::{ErrorRecord, InstanceError, StepError, ValidationError};
use crate::graph::expansion::{self, OutputError};
use crate::graph::{JobGraph, NodeId, NodeOutput, NodeOutputs};
use crate::observability::messages::concurrency::SlotReleaseFailed;
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionFailed, ExecutionStarted, NodeExpanded,
};
use crate::observability::messages::run::StepRetryScheduled;
use crate::observability::messages::validation::ExpansionFailed;
use crate::observability::messages::StructuredLog;
use crate::runs::{RetryPolicy, RunStatus, RunTracker, StepExecution, StepStatus};
use crate::traits::{Op, OpInputs, OpOutput, DEFAULT_OUTPUT};

/// Drives runs of job graphs to a terminal status.
#[derive(Clone)]
pub struct RunExecutor {
    tracker: Arc<RunTracker>,
    admission: Arc<AdmissionController>,
    retry_policy: RetryPolicy,
    max_concurrency: usize,
}

/// Terminal status of a run plus the outputs of every node that completed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub outputs: BTreeMap<String, NodeOutputs>,
}

impl RunOutcome {
    fn without_outputs(run_id: &str, status: RunStatus) -> Self {
        Self {
            run_id: run_id.to_string(),
            status,
            outputs: BTreeMap::new(),
        }
    }

    /// The plain `result` value of an unmapped op.
    pub fn output_value(&self, op_name: &str) -> Option<&Value> {
        match self.outputs.get(op_name)?.get(DEFAULT_OUTPUT)? {
            NodeOutput::Single(value) => Some(value),
            NodeOutput::FanOut(_) => None,
        }
    }

    /// Values of an op's `result` output in emission order. A plain output yields one value.
    pub fn output_values(&self, op_name: &str) -> Vec<Value> {
        match self
            .outputs
            .get(op_name)
            .and_then(|outputs| outputs.get(DEFAULT_OUTPUT))
        {
            Some(NodeOutput::Single(value)) => vec![value.clone()],
            Some(NodeOutput::FanOut(emissions)) => emissions.iter().map(|e| e.value.clone()).collect(),
            None => Vec::new(),
        }
    }
}

enum NodeState {
    Waiting,
    Running {
        remaining: usize,
        per_step: Vec<Option<(Option<String>, NodeOutputs)>>,
        failed: bool,
    },
    Done,
    Failed,
}

enum StepOutcome {
    Succeeded(NodeOutputs),
    Failed,
    Skipped,
    /// The step emitted mapping keys that cannot be expanded.
    Invalid(ValidationError),
}

struct StepReport {
    node: NodeId,
    index: usize,
    mapping_key: Option<String>,
    outcome: StepOutcome,
}

impl RunExecutor {
    pub fn new(tracker: Arc<RunTracker>, admission: Arc<AdmissionController>) -> Self {
        Self {
            tracker,
            admission,
            retry_policy: RetryPolicy::never(),
            max_concurrency: FALLBACK_MAX_CONCURRENCY,
        }
    }

    /// Policy for ops that do not declare their own.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Maximum steps of one run executing at once. Clamped to at least 1.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    /// Executes a QUEUED run to completion.
    pub async fn execute(&self, run_id: &str, job: Arc<JobGraph>) -> Result<RunOutcome, InstanceError> {
        let started = Instant::now();
        let cancel = self.tracker.cancel_token(run_id).await?;

        // === PHASE 1: START ===
        match self
            .tracker
            .transition_run(run_id, RunStatus::Started, None)
            .await
        {
            Ok(_) => {}
            Err(InstanceError::InvalidRunTransition {
                from: RunStatus::Canceling,
                ..
            }) => {
                let release_failure = self.free_run_slots(run_id);
                let status = self
                    .finish_run(run_id, &cancel, None, release_failure)
                    .await?;
                return Ok(RunOutcome::without_outputs(run_id, status));
            }
            Err(InstanceError::InvalidRunTransition { from, .. }) if from.is_terminal() => {
                return Ok(RunOutcome::without_outputs(run_id, from));
            }
            Err(err) => return Err(err),
        }

        ExecutionStarted {
            run_id,
            job_name: job.name(),
            node_count: job.nodes().len(),
            max_concurrency: self.max_concurrency,
        }
        .log();

        // === PHASE 2: DEPENDENCY COUNTS ===
        let nodes = job.nodes();
        let mut pending: Vec<usize> = nodes.iter().map(|n| n.upstream_nodes().len()).collect();
        let downstream: Vec<Vec<NodeId>> = nodes.iter().map(|n| job.downstream_nodes(n.id)).collect();
        let mut states: Vec<NodeState> = nodes.iter().map(|_| NodeState::Waiting).collect();
        let mut ready: VecDeque<NodeId> = nodes
            .iter()
            .filter(|n| pending[n.id.0] == 0)
            .map(|n| n.id)
            .collect();
        let mut results: HashMap<NodeId, NodeOutputs> = HashMap::new();
        let mut run_failure: Option<ErrorRecord> = None;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks: JoinSet<StepReport> = JoinSet::new();

        // === PHASE 3: EXPAND AND EXECUTE ===
        loop {
            while !cancel.is_cancelled() && run_failure.is_none() {
                let Some(node_id) = ready.pop_front() else {
                    break;
                };
                let node = &nodes[node_id.0];

                let planned = match expansion::expand_node(&job, node, &results) {
                    Ok(planned) => planned,
                    Err(err) => {
                        ExpansionFailed { run_id, error: &err }.log();
                        let record = ErrorRecord::from(&err);
                        self.record_unrun_step(run_id, node.name(), &node.def.concurrency_keys, Some(record.clone()))
                            .await?;
                        states[node_id.0] = NodeState::Failed;
                        run_failure = Some(record);
                        break;
                    }
                };

                NodeExpanded {
                    run_id,
                    op_name: node.name(),
                    step_count: planned.len(),
                }
                .log();

                if planned.is_empty() {
                    results.insert(node_id, expansion::gather_mapped(node, &[]));
                    states[node_id.0] = NodeState::Done;
                    release_dependents(&downstream[node_id.0], &mut pending, &mut ready);
                    continue;
                }

                states[node_id.0] = NodeState::Running {
                    remaining: planned.len(),
                    per_step: planned.iter().map(|_| None).collect(),
                    failed: false,
                };

                for (index, step) in planned.into_iter().enumerate() {
                    self.tracker
                        .add_step(
                            StepExecution::new(run_id, &step.step_key, node.name())
                                .with_concurrency_keys(node.def.concurrency_keys.clone())
                                .with_mapping_key(step.mapping_key.clone()),
                        )
                        .await?;

                    let task = StepTask {
                        run_id: run_id.to_string(),
                        step_key: step.step_key,
                        mapping_key: step.mapping_key,
                        node: node_id,
                        index,
                        op: node.def.op.clone(),
                        job: job.clone(),
                        keys: node.def.concurrency_keys.clone(),
                        inputs: step.inputs,
                        retry_policy: node.def.retry_policy.unwrap_or(self.retry_policy),
                        tracker: self.tracker.clone(),
                        admission: self.admission.clone(),
                        semaphore: semaphore.clone(),
                        cancel: cancel.clone(),
                    };
                    tasks.spawn(task.run());
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let report = match joined {
                Ok(report) => report,
                Err(join_err) => {
                    ExecutionFailed {
                        run_id,
                        error: &join_err,
                    }
                    .log();
                    run_failure.get_or_insert_with(|| {
                        ErrorRecord::new("step_task_panicked", join_err.to_string())
                    });
                    continue;
                }
            };

            let slot = report.node.0;
            let NodeState::Running {
                remaining,
                per_step,
                failed,
            } = &mut states[slot]
            else {
                continue;
            };

            match report.outcome {
                StepOutcome::Succeeded(outputs) => {
                    per_step[report.index] = Some((report.mapping_key, outputs));
                }
                StepOutcome::Failed | StepOutcome::Skipped => *failed = true,
                StepOutcome::Invalid(err) => {
                    *failed = true;
                    ExpansionFailed { run_id, error: &err }.log();
                    run_failure.get_or_insert_with(|| ErrorRecord::from(&err));
                }
            }
            *remaining -= 1;
            if *remaining > 0 {
                continue;
            }

            // === NODE COMPLETION ===
            if std::mem::replace(failed, false) {
                states[slot] = NodeState::Failed;
                continue;
            }
            let finished: Vec<(Option<String>, NodeOutputs)> =
                std::mem::take(per_step).into_iter().flatten().collect();
            let node = &nodes[slot];
            let outputs = if node.is_mapped() {
                let keyed: Vec<(String, NodeOutputs)> = finished
                    .into_iter()
                    .map(|(key, outputs)| (key.unwrap_or_default(), outputs))
                    .collect();
                expansion::gather_mapped(node, &keyed)
            } else {
                finished
                    .into_iter()
                    .next()
                    .map(|(_, outputs)| outputs)
                    .unwrap_or_default()
            };
            results.insert(report.node, outputs);
            states[slot] = NodeState::Done;
            release_dependents(&downstream[slot], &mut pending, &mut ready);
        }

        // === PHASE 4: TEARDOWN ===
        for node in nodes {
            if matches!(states[node.id.0], NodeState::Waiting) {
                self.record_unrun_step(run_id, node.name(), &node.def.concurrency_keys, None)
                    .await?;
            }
        }
        let release_failure = self.free_run_slots(run_id);

        let status = self
            .finish_run(run_id, &cancel, run_failure, release_failure)
            .await?;
        let step_count = self.tracker.run(run_id).await?.steps.len();
        ExecutionCompleted {
            run_id,
            job_name: job.name(),
            status,
            step_count,
            duration: started.elapsed(),
        }
        .log();

        let outputs = results
            .into_iter()
            .filter_map(|(id, outputs)| job.node(id).map(|n| (n.name().to_string(), outputs)))
            .collect();
        Ok(RunOutcome {
            run_id: run_id.to_string(),
            status,
            outputs,
        })
    }

    /// Records a node that never ran as a SKIPPED step keyed by its op name.
    async fn record_unrun_step(
        &self,
        run_id: &str,
        op_name: &str,
        keys: &[String],
        error: Option<ErrorRecord>,
    ) -> Result<(), InstanceError> {
        self.tracker
            .add_step(StepExecution::new(run_id, op_name, op_name).with_concurrency_keys(keys.to_vec()))
            .await?;
        self.tracker
            .transition_step(run_id, op_name, StepStatus::Skipped, error)
            .await
    }

    /// A slot the ledger could not free stays held, so the run cannot end CANCELED or SUCCESS.
    fn free_run_slots(&self, run_id: &str) -> Option<ErrorRecord> {
        let error = self.admission.free_run(run_id).err()?;
        SlotReleaseFailed {
            run_id,
            step_key: None,
            error: &error,
        }
        .log();
        Some(
            ErrorRecord::new(error.as_label(), error.to_string())
                .with_context("concurrency slots of the run are still held"),
        )
    }

    async fn finish_run(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
        run_failure: Option<ErrorRecord>,
        release_failure: Option<ErrorRecord>,
    ) -> Result<RunStatus, InstanceError> {
        if let Some(record) = release_failure {
            self.tracker
                .transition_run(run_id, RunStatus::Failure, Some(record))
                .await?;
            return Ok(RunStatus::Failure);
        }

        if !cancel.is_cancelled() {
            let (status, error) = match run_failure {
                Some(record) => (RunStatus::Failure, Some(record)),
                None => (self.tracker.run(run_id).await?.outcome(), None),
            };
            match self.tracker.transition_run(run_id, status, error).await {
                Ok(_) => return Ok(status),
                // termination was requested after the last step finished
                Err(InstanceError::InvalidRunTransition {
                    from: RunStatus::Canceling,
                    ..
                }) => {}
                Err(err) => return Err(err),
            }
        }

        self.tracker
            .transition_run(run_id, RunStatus::Canceled, None)
            .await?;
        Ok(RunStatus::Canceled)
    }
}

fn release_dependents(dependents: &[NodeId], pending: &mut [usize], ready: &mut VecDeque<NodeId>) {
    for dependent in dependents {
        let count = &mut pending[dependent.0];
        *count = count.saturating_sub(1);
        if *count == 0 {
            ready.push_back(*dependent);
        }
    }
}

/// Everything one spawned step needs, owned so the task is `'static`.
struct StepTask {
    run_id: String,
    step_key: String,
    mapping_key: Option<String>,
    node: NodeId,
    index: usize,
    op: Arc<dyn Op>,
    job: Arc<JobGraph>,
    keys: Vec<String>,
    inputs: OpInputs,
    retry_policy: RetryPolicy,
    tracker: Arc<RunTracker>,
    admission: Arc<AdmissionController>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl StepTask {
    async fn run(self) -> StepReport {
        let outcome = match self.drive().await {
            Ok(outcome) => outcome,
            Err(err) => {
                ExecutionFailed {
                    run_id: &self.run_id,
                    error: &err,
                }
                .log();
                StepOutcome::Failed
            }
        };
        StepReport {
            node: self.node,
            index: self.index,
            mapping_key: self.mapping_key,
            outcome,
        }
    }

    async fn drive(&self) -> Result<StepOutcome, InstanceError> {
        self.transition(StepStatus::Starting, None).await?;
        let mut retries_used = 0u32;

        loop {
            // Slots first: a step parked on a busy key holds none of the run's permits.
            let handle = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.abandon(retries_used).await,
                acquired = self.admission.acquire_or_wait(&self.run_id, &self.step_key, &self.keys) => {
                    match acquired {
                        Ok(handle) => handle,
                        Err(err) => {
                            let record = ErrorRecord::new(err.as_label(), err.to_string());
                            self.transition(StepStatus::Failure, Some(record)).await?;
                            return Ok(StepOutcome::Failed);
                        }
                    }
                }
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = self.semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                self.release(handle);
                return self.abandon(retries_used).await;
            };

            self.transition(StepStatus::Running, None).await?;
            let attempt = retries_used + 1;
            let ctx = StepContext::new(
                self.run_id.as_str(),
                self.step_key.as_str(),
                self.mapping_key.clone(),
                attempt,
                self.cancel.clone(),
            );

            let error = match self.compute(ctx).await {
                Ok(output) => {
                    drop(permit);
                    self.release(handle);
                    return self.complete(output).await;
                }
                Err(error) => error,
            };
            drop(permit);
            self.release(handle);

            if matches!(error, StepError::Interrupted) {
                return self.interrupt().await;
            }

            let delay = match self.retry_policy.next_delay(retries_used, &error) {
                Some(delay) if !self.cancel.is_cancelled() => delay,
                _ => {
                    self.transition(StepStatus::Failure, Some(ErrorRecord::from(&error)))
                        .await?;
                    return Ok(StepOutcome::Failed);
                }
            };

            StepRetryScheduled {
                run_id: &self.run_id,
                step_key: &self.step_key,
                attempt,
                delay,
                error: &error.to_string(),
            }
            .log();
            self.transition(StepStatus::UpForRetry, Some(ErrorRecord::from(&error)))
                .await?;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.interrupt().await,
                _ = tokio::time::sleep(delay) => {}
            }

            retries_used += 1;
            self.transition(StepStatus::Restarted, None).await?;
        }
    }

    /// Runs the op on its own task so a panic becomes a fatal step error.
    async fn compute(&self, ctx: StepContext) -> Result<OpOutput, StepError> {
        let op = self.op.clone();
        let inputs = self.inputs.clone();
        let mut handle = tokio::spawn(async move { op.compute(ctx, inputs).await });

        tokio::select! {
            joined = &mut handle => joined.unwrap_or_else(|e| Err(StepError::fatal(format!("op panicked: {e}")))),
            _ = self.cancel.cancelled() => {
                handle.abort();
                Err(StepError::Interrupted)
            }
        }
    }

    async fn complete(&self, output: OpOutput) -> Result<StepOutcome, InstanceError> {
        let Some(node) = self.job.node(self.node) else {
            return Err(InstanceError::Launch {
                run_id: self.run_id.clone(),
                reason: format!("step '{}' has no node in job '{}'", self.step_key, self.job.name()),
            });
        };

        match expansion::outputs_from_op(node, &self.step_key, output) {
            Ok(outputs) => {
                self.transition(StepStatus::Success, None).await?;
                Ok(StepOutcome::Succeeded(outputs))
            }
            Err(OutputError::Contract(err)) => {
                self.transition(StepStatus::Failure, Some(ErrorRecord::from(&err)))
                    .await?;
                Ok(StepOutcome::Failed)
            }
            Err(OutputError::Validation(err)) => {
                self.transition(StepStatus::Failure, Some(ErrorRecord::from(&err)))
                    .await?;
                Ok(StepOutcome::Invalid(err))
            }
        }
    }

    /// Canceled while waiting for slots or a permit. Skipped if the op never ran.
    async fn abandon(&self, retries_used: u32) -> Result<StepOutcome, InstanceError> {
        if retries_used > 0 {
            return self.interrupt().await;
        }
        self.transition(StepStatus::Skipped, None).await?;
        Ok(StepOutcome::Skipped)
    }

    async fn interrupt(&self) -> Result<StepOutcome, InstanceError> {
        self.transition(
            StepStatus::Failure,
            Some(ErrorRecord::from(&StepError::Interrupted)),
        )
        .await?;
        Ok(StepOutcome::Failed)
    }

    fn release(&self, handle: SlotHandle) {
        if let Err(error) = handle.release() {
            SlotReleaseFailed {
                run_id: &self.run_id,
                step_key: Some(&self.step_key),
                error: &error,
            }
            .log();
        }
    }

    async fn transition(&self, to: StepStatus, error: Option<ErrorRecord>) -> Result<(), InstanceError> {
        self.tracker
            .transition_step(&self.run_id, &self.step_key, to, error)
            .await
    }
}
