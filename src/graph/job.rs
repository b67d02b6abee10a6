// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Arena representation of a job: ops as nodes, inputs as references to
//! upstream outputs by [`NodeId`].
//!
//! Nodes are stored in insertion order and may only reference earlier nodes,
//! so the arena order is a valid topological order.

use std::fmt;
use std::sync::Arc;

use crate::runs::RetryPolicy;
use crate::traits::{Op, DEFAULT_OUTPUT};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn output(self, name: impl Into<String>) -> OutputRef {
        OutputRef {
            node: self,
            output: name.into(),
        }
    }

    /// The default `result` output.
    pub fn result(self) -> OutputRef {
        self.output(DEFAULT_OUTPUT)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub node: NodeId,
    pub output: String,
}

/// Where an input value comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum InputSource {
    /// A plain (non fan-out) output of an upstream op.
    Value(OutputRef),
    /// Every emission of a fan-out output, gathered into one array.
    Collect(OutputRef),
}

impl InputSource {
    pub fn output_ref(&self) -> &OutputRef {
        match self {
            InputSource::Value(r) | InputSource::Collect(r) => r,
        }
    }
}

/// How many times a node is invoked.
#[derive(Clone, Debug, PartialEq)]
pub enum Invocation {
    Single,
    /// Once per emission of `over`; `zip_with` sources are paired by position.
    Mapped {
        over: (String, OutputRef),
        zip_with: Vec<(String, OutputRef)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDef {
    pub name: String,
    pub dynamic: bool,
}

/// An op plus the declarations the executor needs to schedule it.
#[derive(Clone)]
pub struct OpDef {
    pub name: String,
    pub op: Arc<dyn Op>,
    pub outputs: Vec<OutputDef>,
    pub concurrency_keys: Vec<String>,
    pub retry_policy: Option<RetryPolicy>,
}

impl OpDef {
    /// An op with a single static `result` output.
    pub fn new(name: impl Into<String>, op: Arc<dyn Op>) -> Self {
        Self {
            name: name.into(),
            op,
            outputs: vec![OutputDef {
                name: DEFAULT_OUTPUT.to_string(),
                dynamic: false,
            }],
            concurrency_keys: Vec::new(),
            retry_policy: None,
        }
    }

    /// An op whose `result` output fans out.
    pub fn dynamic(name: impl Into<String>, op: Arc<dyn Op>) -> Self {
        let mut def = Self::new(name, op);
        def.outputs[0].dynamic = true;
        def
    }

    /// Replaces the declared outputs with `(name, dynamic)` pairs.
    pub fn with_outputs(mut self, outputs: &[(&str, bool)]) -> Self {
        self.outputs = outputs
            .iter()
            .map(|(name, dynamic)| OutputDef {
                name: name.to_string(),
                dynamic: *dynamic,
            })
            .collect();
        self
    }

    pub fn with_concurrency_key(mut self, key: impl Into<String>) -> Self {
        self.concurrency_keys.push(key.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn output_def(&self, name: &str) -> Option<&OutputDef> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

impl fmt::Debug for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.name)
            .field("outputs", &self.outputs)
            .field("concurrency_keys", &self.concurrency_keys)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct OpNode {
    pub id: NodeId,
    pub def: OpDef,
    pub inputs: Vec<(String, InputSource)>,
    pub invocation: Invocation,
}

impl OpNode {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.invocation, Invocation::Mapped { .. })
    }

    /// Every upstream output this node reads, mapped sources first.
    pub fn upstream_refs(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        if let Invocation::Mapped { over, zip_with } = &self.invocation {
            refs.push(&over.1);
            refs.extend(zip_with.iter().map(|(_, r)| r));
        }
        refs.extend(self.inputs.iter().map(|(_, s)| s.output_ref()));
        refs
    }

    /// Distinct upstream nodes in arena order.
    pub fn upstream_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.upstream_refs().iter().map(|r| r.node).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// A validated job. Built with [`JobBuilder`](crate::graph::JobBuilder).
#[derive(Clone, Debug)]
pub struct JobGraph {
    pub(crate) name: String,
    pub(crate) nodes: Vec<OpNode>,
}

impl JobGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[OpNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&OpNode> {
        self.nodes.get(id.0)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&OpNode> {
        self.nodes.iter().find(|n| n.def.name == name)
    }

    /// True when consumers see `output` as a stream of mapped emissions.
    ///
    /// Outputs of mapped nodes fan out keyed by the mapping keys of their primary source.
    pub fn is_fan_out(&self, output: &OutputRef) -> bool {
        self.node(output.node).map_or(false, |node| {
            node.is_mapped()
                || node
                    .def
                    .output_def(&output.output)
                    .map_or(false, |o| o.dynamic)
        })
    }

    /// Nodes reading any output of `id`.
    pub fn downstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.upstream_nodes().contains(&id))
            .map(|n| n.id)
            .collect()
    }
}
