// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;

use crate::demo;
use crate::engine::StepContext;
use crate::errors::InstanceError;
use crate::graph::{JobBuilder, JobGraph, OpDef};
use crate::instance::{DaemonHeartbeat, HeartbeatStore, Instance, InstanceOptions};
use crate::runs::{Run, RunEventKind, RunStatus};
use crate::traits::{OpFn, OpInputs, OpOutput, RunLauncher};

fn instance_with_demo_jobs() -> Instance {
    let instance = Instance::ephemeral();
    for (job, _) in demo::demo_jobs().unwrap() {
        instance.register_job(job);
    }
    instance
}

#[tokio::test]
async fn launched_run_reaches_success() {
    let instance = instance_with_demo_jobs();
    let run_id = instance.launch_job("basic_example").await.unwrap();

    let run = tokio::time::timeout(Duration::from_secs(5), instance.wait_for_run(&run_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.steps.len(), 7);
    assert_eq!(run.events.first().map(|e| e.kind), Some(RunEventKind::PipelineEnqueued));
    assert_eq!(run.events.last().map(|e| e.kind), Some(RunEventKind::PipelineSuccess));
}

/// Refuses every run, like a launcher whose backend is unreachable.
struct RefusingLauncher;

#[async_trait]
impl RunLauncher for RefusingLauncher {
    fn name(&self) -> &str {
        "RefusingLauncher"
    }

    async fn launch(&self, run: &Run, _job: Arc<JobGraph>) -> Result<(), InstanceError> {
        Err(InstanceError::Launch {
            run_id: run.run_id.clone(),
            reason: "backend unavailable".to_string(),
        })
    }

    async fn terminate(&self, _run_id: &str) -> Result<bool, InstanceError> {
        Ok(false)
    }
}

#[tokio::test]
async fn refused_launch_fails_the_run() {
    let instance = instance_with_demo_jobs().with_launcher(Arc::new(RefusingLauncher));
    let run_id = instance.submit_run("basic_example").await.unwrap();

    let err = instance.launch_run(&run_id).await.unwrap_err();
    assert!(matches!(err, InstanceError::Launch { .. }));

    let run = instance.wait_for_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failure);
    let record = run.error.as_ref().unwrap();
    assert_eq!(record.class_name, "launch_failed");
    assert!(record.message.contains("backend unavailable"));
    assert_eq!(run.events.last().map(|e| e.kind), Some(RunEventKind::PipelineFailure));

    assert!(instance.reporter().queued_runs().await.is_empty());
    assert!(!instance.can_terminate(&run_id).await.unwrap());
    assert!(!instance.terminate_run(&run_id).await.unwrap());
}

#[tokio::test]
async fn execute_run_returns_outputs() {
    let instance = instance_with_demo_jobs();
    let run_id = instance.submit_run("with_collect").await.unwrap();
    let outcome = instance.execute_run(&run_id).await.unwrap();
    assert_eq!(outcome.output_value("collect_and_sum"), Some(&json!(20)));

    let again = instance.execute_run(&run_id).await.unwrap_err();
    assert!(matches!(again, InstanceError::Launch { .. }));
}

#[tokio::test]
async fn unknown_job_and_run_are_reported() {
    let instance = Instance::ephemeral();
    assert!(matches!(
        instance.submit_run("nope").await.unwrap_err(),
        InstanceError::JobNotFound { .. }
    ));
    assert!(matches!(
        instance.terminate_run("missing").await.unwrap_err(),
        InstanceError::RunNotFound { .. }
    ));
}

#[tokio::test]
async fn terminating_a_queued_run_cancels_it() {
    let instance = instance_with_demo_jobs();
    let run_id = instance.submit_run("basic_example").await.unwrap();
    assert_eq!(instance.reporter().queued_runs().await.len(), 1);

    assert!(instance.can_terminate(&run_id).await.unwrap());
    assert!(instance.terminate_run(&run_id).await.unwrap());
    assert!(!instance.terminate_run(&run_id).await.unwrap());
    assert!(!instance.can_terminate(&run_id).await.unwrap());

    let run = instance.wait_for_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert!(instance.reporter().queued_runs().await.is_empty());
}

#[tokio::test]
async fn terminating_a_running_run_frees_its_slots() {
    let started = Arc::new(Notify::new());
    let signal = started.clone();
    let hang = OpFn::arc(move |_ctx: StepContext, _inputs: OpInputs| {
        let signal = signal.clone();
        async move {
            signal.notify_one();
            std::future::pending::<()>().await;
            Ok(OpOutput::new())
        }
    });
    let mut job = JobBuilder::new("hang");
    job.add_op(OpDef::new("hang", hang).with_concurrency_key("foo"), vec![]);

    let instance = Instance::ephemeral();
    instance.register_job(job.build().unwrap());
    instance.set_concurrency_limit("foo", 1).unwrap();

    let run_id = instance.launch_job("hang").await.unwrap();
    started.notified().await;

    let reporter = instance.reporter();
    let foo = reporter.concurrency_limit("foo");
    assert_eq!(foo.num_active, 1);
    assert_eq!(foo.active_run_ids, vec![run_id.clone()]);
    assert_eq!(reporter.active_runs().await.len(), 1);

    assert!(instance.terminate_run(&run_id).await.unwrap());
    let run = tokio::time::timeout(Duration::from_secs(5), instance.wait_for_run(&run_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Canceled);

    let foo = reporter.concurrency_limit("foo");
    assert_eq!(foo.limit, 1);
    assert_eq!(foo.num_active, 0);
    assert!(foo.active_run_ids.is_empty());
    assert!(reporter.active_runs().await.is_empty());
}

#[tokio::test]
async fn snapshot_reflects_limits_daemons_and_settings() {
    let options = InstanceOptions {
        heartbeats: HeartbeatStore::new(Duration::from_secs(60)).with_required(["SCHEDULER"]),
        ..InstanceOptions::default()
    };
    let instance = Instance::new(
        Arc::new(crate::concurrency::ConcurrencyLedger::in_memory()),
        options,
    );
    instance.set_concurrency_limit("foo", 10).unwrap();
    instance.set_concurrency_limit("bar", 2).unwrap();
    instance.set_auto_materialize_paused(true);
    instance.record_heartbeat(DaemonHeartbeat::new("SCHEDULER", "d1").at(SystemTime::now()));

    let reporter = instance.reporter();
    assert!(reporter.daemon_status("SCHEDULER").unwrap().healthy);
    assert!(matches!(
        reporter.daemon_status("SENSOR").unwrap_err(),
        InstanceError::DaemonNotFound { .. }
    ));

    let snapshot = reporter.instance_snapshot().await;
    assert_eq!(snapshot.run_launcher, "InProcessRunLauncher");
    assert!(snapshot.auto_materialize_paused);
    let keys: Vec<&str> = snapshot
        .concurrency_limits
        .iter()
        .map(|l| l.key.as_str())
        .collect();
    assert_eq!(keys, vec!["bar", "foo"]);
    assert_eq!(snapshot.concurrency_limits[1].limit, 10);

    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["daemons"][0]["daemon_type"], json!("SCHEDULER"));
    assert_eq!(value["concurrency_limits"][0]["num_active"], json!(0));
}

#[tokio::test]
async fn negative_limit_is_rejected() {
    let instance = Instance::ephemeral();
    let err = instance.set_concurrency_limit("foo", -1).unwrap_err();
    assert_eq!(err.as_label(), "concurrency_invalid_limit");
}
