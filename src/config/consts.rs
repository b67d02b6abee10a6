// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Default capacity of the run event broadcast bus
pub const DEFAULT_BUS_CAPACITY: usize = 1024;
/// Heartbeats older than this mark a daemon unhealthy (seconds)
pub const DEFAULT_HEARTBEAT_TOLERANCE_SECONDS: u64 = 300;
/// Steps are not retried unless configured
pub const DEFAULT_MAX_RETRIES: u32 = 0;
/// Delay before the first retry (milliseconds)
pub const DEFAULT_BACKOFF_FIRST_MS: u64 = 100;
/// Upper bound for any retry delay (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
/// Multiplicative growth of the retry delay
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
/// Fallback step concurrency when the CPU count cannot be detected
pub const FALLBACK_MAX_CONCURRENCY: usize = 4;
