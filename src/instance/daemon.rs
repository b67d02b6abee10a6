// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Daemon heartbeats and the health derived from them.
//!
//! Heartbeat producers call [`HeartbeatStore::record_heartbeat`]; only the latest
//! heartbeat per daemon type is kept. A daemon is healthy when its latest heartbeat
//! is no older than the configured tolerance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use crate::config::consts::DEFAULT_HEARTBEAT_TOLERANCE_SECONDS;
use crate::errors::{ErrorRecord, InstanceError};
use crate::observability::messages::daemon::{DaemonUnhealthy, HeartbeatRecorded};
use crate::observability::messages::StructuredLog;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonHeartbeat {
    pub timestamp: SystemTime,
    pub daemon_type: String,
    pub daemon_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
}

impl DaemonHeartbeat {
    pub fn new(daemon_type: impl Into<String>, daemon_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            daemon_type: daemon_type.into(),
            daemon_id: daemon_id.into(),
            errors: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_error(mut self, error: ErrorRecord) -> Self {
        self.errors.push(error);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub daemon_type: String,
    pub required: bool,
    pub healthy: bool,
    pub last_heartbeat: Option<DaemonHeartbeat>,
}

/// Latest heartbeat per daemon type plus the set of daemons that must be running.
#[derive(Debug)]
pub struct HeartbeatStore {
    heartbeats: RwLock<BTreeMap<String, DaemonHeartbeat>>,
    required: BTreeSet<String>,
    tolerance: Duration,
}

impl Default for HeartbeatStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_HEARTBEAT_TOLERANCE_SECONDS))
    }
}

impl HeartbeatStore {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            heartbeats: RwLock::new(BTreeMap::new()),
            required: BTreeSet::new(),
            tolerance,
        }
    }

    pub fn with_required<I, S>(mut self, daemon_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(daemon_types.into_iter().map(Into::into));
        self
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, DaemonHeartbeat>> {
        self.heartbeats.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, DaemonHeartbeat>> {
        self.heartbeats.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the latest heartbeat of the daemon's type. Older heartbeats are ignored.
    pub fn record_heartbeat(&self, heartbeat: DaemonHeartbeat) {
        HeartbeatRecorded {
            daemon_type: &heartbeat.daemon_type,
            daemon_id: &heartbeat.daemon_id,
            error_count: heartbeat.errors.len(),
        }
        .log();

        let mut heartbeats = self.write();
        match heartbeats.get(&heartbeat.daemon_type) {
            Some(existing) if existing.timestamp > heartbeat.timestamp => {}
            _ => {
                heartbeats.insert(heartbeat.daemon_type.clone(), heartbeat);
            }
        }
    }

    /// Status of one daemon type as of `now`.
    ///
    /// Unknown types (not required and never heard from) are `DaemonNotFound`.
    pub fn status(&self, daemon_type: &str, now: SystemTime) -> Result<DaemonStatus, InstanceError> {
        let heartbeats = self.read();
        let last = heartbeats.get(daemon_type);
        let required = self.required.contains(daemon_type);
        if last.is_none() && !required {
            return Err(InstanceError::DaemonNotFound {
                daemon_type: daemon_type.to_string(),
            });
        }
        Ok(self.build_status(daemon_type, required, last, now))
    }

    /// Statuses of every required or heard-from daemon, sorted by type.
    pub fn statuses(&self, now: SystemTime) -> Vec<DaemonStatus> {
        let heartbeats = self.read();
        let types: BTreeSet<&String> = self.required.iter().chain(heartbeats.keys()).collect();
        types
            .into_iter()
            .map(|daemon_type| {
                self.build_status(
                    daemon_type,
                    self.required.contains(daemon_type),
                    heartbeats.get(daemon_type),
                    now,
                )
            })
            .collect()
    }

    fn build_status(
        &self,
        daemon_type: &str,
        required: bool,
        last: Option<&DaemonHeartbeat>,
        now: SystemTime,
    ) -> DaemonStatus {
        // A heartbeat stamped in the future counts as fresh.
        let age = last.map(|hb| now.duration_since(hb.timestamp).unwrap_or_default());
        let healthy = age.is_some_and(|age| age <= self.tolerance);

        if required && !healthy {
            DaemonUnhealthy {
                daemon_type,
                seconds_since_heartbeat: age.map(|a| a.as_secs()),
            }
            .log();
        }

        DaemonStatus {
            daemon_type: daemon_type.to_string(),
            required,
            healthy,
            last_heartbeat: last.cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HeartbeatStore {
        HeartbeatStore::new(Duration::from_secs(60)).with_required(["SCHEDULER", "SENSOR"])
    }

    #[test]
    fn fresh_heartbeat_is_healthy() {
        let store = store();
        let now = SystemTime::now();
        store.record_heartbeat(DaemonHeartbeat::new("SCHEDULER", "d1").at(now));

        let status = store.status("SCHEDULER", now + Duration::from_secs(30)).unwrap();
        assert!(status.required);
        assert!(status.healthy);
        assert_eq!(status.last_heartbeat.unwrap().daemon_id, "d1");
    }

    #[test]
    fn stale_or_missing_heartbeat_is_unhealthy() {
        let store = store();
        let now = SystemTime::now();
        store.record_heartbeat(DaemonHeartbeat::new("SCHEDULER", "d1").at(now));

        let later = now + Duration::from_secs(61);
        assert!(!store.status("SCHEDULER", later).unwrap().healthy);

        let sensor = store.status("SENSOR", later).unwrap();
        assert!(!sensor.healthy);
        assert!(sensor.last_heartbeat.is_none());
    }

    #[test]
    fn unknown_daemon_type_is_not_found() {
        let err = store().status("BACKFILL", SystemTime::now()).unwrap_err();
        assert!(matches!(err, InstanceError::DaemonNotFound { .. }));
    }

    #[test]
    fn older_heartbeat_does_not_replace_newer() {
        let store = store();
        let now = SystemTime::now();
        store.record_heartbeat(DaemonHeartbeat::new("SENSOR", "new").at(now));
        store.record_heartbeat(
            DaemonHeartbeat::new("SENSOR", "old").at(now - Duration::from_secs(10)),
        );

        let status = store.status("SENSOR", now).unwrap();
        assert_eq!(status.last_heartbeat.unwrap().daemon_id, "new");
    }

    #[test]
    fn statuses_cover_required_and_reporting_daemons_sorted() {
        let store = store();
        let now = SystemTime::now();
        store.record_heartbeat(
            DaemonHeartbeat::new("ASSET", "a1")
                .at(now)
                .with_error(ErrorRecord::new("tick_failed", "sensor tick raised")),
        );

        let statuses = store.statuses(now);
        let types: Vec<&str> = statuses.iter().map(|s| s.daemon_type.as_str()).collect();
        assert_eq!(types, vec!["ASSET", "SCHEDULER", "SENSOR"]);
        assert!(!statuses[0].required);
        assert_eq!(statuses[0].last_heartbeat.as_ref().unwrap().errors.len(), 1);
    }
}
