// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod concurrency; // slot ledger + admission
pub mod config;      // instance config + runtime builder
pub mod demo;        // built-in fan-out jobs
pub mod engine;      // run executor
pub mod errors;      // error handling
pub mod graph;       // job graphs and dynamic expansion
pub mod instance;    // facade, launcher, health reporting
pub mod observability;
pub mod runs;        // run/step state machine and events
pub mod traits;      // Op and RunLauncher seams
