// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod launcher;
pub mod op;

pub use launcher::RunLauncher;
pub use op::{DynamicOutput, Op, OpFn, OpInputs, OpOutput, DEFAULT_OUTPUT};
