// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for daemon heartbeats and health.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A daemon reported a heartbeat.
///
/// # Log Level
/// `debug!` for clean heartbeats, `warn!` when the heartbeat carries errors
pub struct HeartbeatRecorded<'a> {
    pub daemon_type: &'a str,
    pub daemon_id: &'a str,
    pub error_count: usize,
}

impl Display for HeartbeatRecorded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Heartbeat from {} daemon '{}' ({} errors)",
            self.daemon_type, self.daemon_id, self.error_count
        )
    }
}

impl StructuredLog for HeartbeatRecorded<'_> {
    fn log(&self) {
        if self.error_count > 0 {
            tracing::warn!(
                daemon_type = self.daemon_type,
                daemon_id = self.daemon_id,
                error_count = self.error_count,
                "{}", self
            );
        } else {
            tracing::debug!(
                daemon_type = self.daemon_type,
                daemon_id = self.daemon_id,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "heartbeat",
            span_name = name,
            daemon_type = self.daemon_type,
            daemon_id = self.daemon_id,
        )
    }
}

/// A required daemon has no fresh heartbeat.
///
/// # Log Level
/// `warn!`
pub struct DaemonUnhealthy<'a> {
    pub daemon_type: &'a str,
    pub seconds_since_heartbeat: Option<u64>,
}

impl Display for DaemonUnhealthy<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.seconds_since_heartbeat {
            Some(secs) => write!(
                f,
                "Required daemon {} is unhealthy: last heartbeat {}s ago",
                self.daemon_type, secs
            ),
            None => write!(
                f,
                "Required daemon {} is unhealthy: no heartbeat recorded",
                self.daemon_type
            ),
        }
    }
}

impl StructuredLog for DaemonUnhealthy<'_> {
    fn log(&self) {
        tracing::warn!(
            daemon_type = self.daemon_type,
            seconds_since_heartbeat = self.seconds_since_heartbeat,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "daemon_unhealthy",
            span_name = name,
            daemon_type = self.daemon_type,
        )
    }
}
