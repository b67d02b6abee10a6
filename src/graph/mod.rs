// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Job graphs and their dynamic fan-out/fan-in expansion.

pub mod builder;
pub mod expansion;
pub mod job;

pub use builder::JobBuilder;
pub use expansion::{Emission, NodeOutput, NodeOutputs, PlannedStep};
pub use job::{InputSource, Invocation, JobGraph, NodeId, OpDef, OpNode, OutputDef, OutputRef};
