// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Point-in-time views of daemon health, concurrency usage and runs.
//!
//! The reporter owns no state. Every query reads the ledger, the run tracker, the
//! heartbeat store or the settings store at call time, so two queries may observe
//! different moments.

use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;

use crate::concurrency::{ConcurrencyStore, SlotInfo};
use crate::errors::InstanceError;
use crate::instance::daemon::{DaemonStatus, HeartbeatStore};
use crate::instance::settings::{self, SettingsStore};
use crate::runs::{Run, RunSummary, RunTracker};

/// Usage of one concurrency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyLimit {
    pub key: String,
    /// Total slots: free capacity plus every held slot.
    pub limit: usize,
    pub active_run_ids: Vec<String>,
    pub num_active: usize,
}

impl ConcurrencyLimit {
    pub fn from_info(key: &str, rows: &[SlotInfo]) -> Self {
        let limit = rows.iter().map(|r| r.count).sum();
        let num_active = rows
            .iter()
            .filter(|r| r.run_id.is_some())
            .map(|r| r.count)
            .sum();
        let mut active_run_ids: Vec<String> = rows.iter().filter_map(|r| r.run_id.clone()).collect();
        active_run_ids.sort();
        active_run_ids.dedup();

        Self {
            key: key.to_string(),
            limit,
            active_run_ids,
            num_active,
        }
    }
}

/// Everything the reporter knows, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub run_launcher: String,
    pub daemons: Vec<DaemonStatus>,
    pub concurrency_limits: Vec<ConcurrencyLimit>,
    pub queued_runs: Vec<RunSummary>,
    pub active_runs: Vec<RunSummary>,
    pub auto_materialize_paused: bool,
}

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn ConcurrencyStore>,
    tracker: Arc<RunTracker>,
    heartbeats: Arc<HeartbeatStore>,
    settings: Arc<dyn SettingsStore>,
    run_launcher: String,
}

impl StatusReporter {
    pub fn new(
        store: Arc<dyn ConcurrencyStore>,
        tracker: Arc<RunTracker>,
        heartbeats: Arc<HeartbeatStore>,
        settings: Arc<dyn SettingsStore>,
        run_launcher: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tracker,
            heartbeats,
            settings,
            run_launcher: run_launcher.into(),
        }
    }

    pub fn daemon_status(&self, daemon_type: &str) -> Result<DaemonStatus, InstanceError> {
        self.heartbeats.status(daemon_type, SystemTime::now())
    }

    /// Sorted by daemon type.
    pub fn all_daemon_statuses(&self) -> Vec<DaemonStatus> {
        self.heartbeats.statuses(SystemTime::now())
    }

    /// One row per limited key, sorted by key.
    pub fn concurrency_limits(&self) -> Vec<ConcurrencyLimit> {
        self.store
            .get_concurrency_limited_keys()
            .iter()
            .map(|key| self.concurrency_limit(key))
            .collect()
    }

    /// An unlimited key reports a limit of 0 and no holders.
    pub fn concurrency_limit(&self, key: &str) -> ConcurrencyLimit {
        ConcurrencyLimit::from_info(key, &self.store.get_concurrency_info(key))
    }

    pub async fn run(&self, run_id: &str) -> Result<Run, InstanceError> {
        self.tracker.run(run_id).await
    }

    pub async fn queued_runs(&self) -> Vec<RunSummary> {
        self.tracker.queued_runs().await
    }

    /// Runs in STARTED or CANCELING.
    pub async fn active_runs(&self) -> Vec<RunSummary> {
        self.tracker.active_runs().await
    }

    pub fn auto_materialize_paused(&self) -> bool {
        settings::auto_materialize_paused(self.settings.as_ref())
    }

    pub async fn instance_snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            run_launcher: self.run_launcher.clone(),
            daemons: self.all_daemon_statuses(),
            concurrency_limits: self.concurrency_limits(),
            queued_runs: self.queued_runs().await,
            active_runs: self.active_runs().await,
            auto_materialize_paused: self.auto_materialize_paused(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(run_id: Option<&str>, count: usize) -> SlotInfo {
        SlotInfo {
            run_id: run_id.map(str::to_string),
            count,
        }
    }

    #[test]
    fn limit_row_sums_capacity_and_dedups_runs() {
        let rows = vec![
            row(None, 2),
            row(Some("run2"), 1),
            row(Some("run1"), 2),
        ];
        let limit = ConcurrencyLimit::from_info("foo", &rows);
        assert_eq!(limit.limit, 5);
        assert_eq!(limit.num_active, 3);
        assert_eq!(limit.active_run_ids, vec!["run1", "run2"]);
    }

    #[test]
    fn empty_info_reports_zero() {
        let limit = ConcurrencyLimit::from_info("unset", &[]);
        assert_eq!(limit.limit, 0);
        assert_eq!(limit.num_active, 0);
        assert!(limit.active_run_ids.is_empty());
    }
}
