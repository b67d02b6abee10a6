// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Builder and structural validation for job graphs.
//!
//! # Validation Pipeline
//!
//! [`JobBuilder::build`] checks every node in arena order and collects all
//! problems instead of stopping at the first one:
//!
//! 1. **Uniqueness**: op names are unique within the job, input names are unique within an op
//! 2. **References**: each input names an earlier node and an output that node declares
//! 3. **Fan-out shape**: fan-out outputs are consumed only through `map`, `zip_with` or
//!    `Collect`; plain outputs are never mapped or collected
//! 4. **Nesting**: a mapped op declares no dynamic outputs of its own
//!
//! Because a node can only reference nodes added before it, the graph is acyclic
//! by construction and no cycle search is needed.
//!
//! # Example
//! ```rust
//! use serde_json::json;
//! use the_runwood::engine::StepContext;
//! use the_runwood::graph::{InputSource, JobBuilder, OpDef};
//! use the_runwood::traits::{OpFn, OpInputs, OpOutput};
//!
//! let noop = OpFn::arc(|_ctx: StepContext, _inputs: OpInputs| async move {
//!     Ok(OpOutput::value(json!(null)))
//! });
//!
//! let mut job = JobBuilder::new("example");
//! let items = job.add_op(OpDef::dynamic("items", noop.clone()), vec![]);
//! let each = job.map(OpDef::new("each", noop.clone()), ("item", items.result()), vec![], vec![]);
//! job.add_op(OpDef::new("gather", noop), vec![("all", InputSource::Collect(each.result()))]);
//!
//! let graph = job.build().unwrap();
//! assert_eq!(graph.nodes().len(), 3);
//! ```

use std::collections::HashSet;

use crate::errors::ValidationError;
use crate::graph::{InputSource, Invocation, JobGraph, NodeId, OpDef, OpNode, OutputRef};
use crate::observability::messages::validation::JobValidationFailed;
use crate::observability::messages::StructuredLog;

pub struct JobBuilder {
    name: String,
    nodes: Vec<OpNode>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Adds an op invoked once.
    pub fn add_op(&mut self, def: OpDef, inputs: Vec<(&str, InputSource)>) -> NodeId {
        self.push(def, inputs, Invocation::Single)
    }

    /// Adds an op invoked once per emission of `over`.
    ///
    /// `zip_with` sources are paired with `over` by emission position. `inputs`
    /// are bound identically for every invocation.
    pub fn map(
        &mut self,
        def: OpDef,
        over: (&str, OutputRef),
        zip_with: Vec<(&str, OutputRef)>,
        inputs: Vec<(&str, InputSource)>,
    ) -> NodeId {
        let invocation = Invocation::Mapped {
            over: (over.0.to_string(), over.1),
            zip_with: zip_with
                .into_iter()
                .map(|(name, r)| (name.to_string(), r))
                .collect(),
        };
        self.push(def, inputs, invocation)
    }

    fn push(&mut self, def: OpDef, inputs: Vec<(&str, InputSource)>, invocation: Invocation) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(OpNode {
            id,
            def,
            inputs: inputs
                .into_iter()
                .map(|(name, source)| (name.to_string(), source))
                .collect(),
            invocation,
        });
        id
    }

    pub fn build(self) -> Result<JobGraph, Vec<ValidationError>> {
        let graph = JobGraph {
            name: self.name,
            nodes: self.nodes,
        };

        let errors = validate_job(&graph);
        if errors.is_empty() {
            Ok(graph)
        } else {
            JobValidationFailed {
                job_name: &graph.name,
                errors: &errors,
            }
            .log();
            Err(errors)
        }
    }
}

fn validate_job(graph: &JobGraph) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen_names = HashSet::new();

    for node in graph.nodes() {
        let step_key = node.name();
        if !seen_names.insert(step_key) {
            errors.push(ValidationError::DuplicateStepKey {
                step_key: step_key.to_string(),
            });
        }

        let mut input_names = HashSet::new();
        let mut check_name = |name: &str, errors: &mut Vec<ValidationError>| {
            if !input_names.insert(name.to_string()) {
                errors.push(ValidationError::DuplicateInput {
                    step_key: step_key.to_string(),
                    input: name.to_string(),
                });
            }
        };

        if let Invocation::Mapped { over, zip_with } = &node.invocation {
            for (name, source) in std::iter::once(over).chain(zip_with.iter()) {
                check_name(name.as_str(), &mut errors);
                if check_reference(graph, node, source, &mut errors) && !graph.is_fan_out(source) {
                    errors.push(not_dynamic(graph, step_key, source));
                }
            }

            for output in node.def.outputs.iter().filter(|o| o.dynamic) {
                errors.push(ValidationError::NestedDynamic {
                    step_key: step_key.to_string(),
                    output: output.name.clone(),
                });
            }
        }

        for (name, source) in &node.inputs {
            check_name(name.as_str(), &mut errors);
            let output = source.output_ref();
            if !check_reference(graph, node, output, &mut errors) {
                continue;
            }
            match (source, graph.is_fan_out(output)) {
                (InputSource::Value(_), true) => {
                    errors.push(ValidationError::DynamicOutputNotMapped {
                        step_key: step_key.to_string(),
                        upstream: upstream_name(graph, output),
                        output: output.output.clone(),
                    });
                }
                (InputSource::Collect(_), false) => {
                    errors.push(not_dynamic(graph, step_key, output));
                }
                _ => {}
            }
        }
    }

    errors
}

/// Reports an unknown output and returns `false` when `output` does not resolve
/// to a declared output of an earlier node.
fn check_reference(
    graph: &JobGraph,
    node: &OpNode,
    output: &OutputRef,
    errors: &mut Vec<ValidationError>,
) -> bool {
    let resolved = output.node < node.id
        && graph
            .node(output.node)
            .map_or(false, |upstream| upstream.def.output_def(&output.output).is_some());
    if !resolved {
        errors.push(ValidationError::UnknownOutput {
            step_key: node.name().to_string(),
            upstream: upstream_name(graph, output),
            output: output.output.clone(),
        });
    }
    resolved
}

fn upstream_name(graph: &JobGraph, output: &OutputRef) -> String {
    graph
        .node(output.node)
        .map(|n| n.name().to_string())
        .unwrap_or_else(|| format!("#{}", output.node.0))
}

fn not_dynamic(graph: &JobGraph, step_key: &str, output: &OutputRef) -> ValidationError {
    ValidationError::NotDynamic {
        step_key: step_key.to_string(),
        upstream: upstream_name(graph, output),
        output: output.output.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StepContext;
    use crate::traits::{Op, OpFn, OpInputs, OpOutput};
    use serde_json::json;
    use std::sync::Arc;

    fn noop() -> Arc<dyn Op> {
        OpFn::arc(|_ctx: StepContext, _inputs: OpInputs| async move {
            Ok(OpOutput::value(json!(null)))
        })
    }

    #[test]
    fn duplicate_names_are_reported() {
        let mut job = JobBuilder::new("dupes");
        let a = job.add_op(OpDef::new("a", noop()), vec![]);
        job.add_op(
            OpDef::new("a", noop()),
            vec![("x", InputSource::Value(a.result())), ("x", InputSource::Value(a.result()))],
        );

        let errors = job.build().unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateStepKey { step_key: "a".into() },
                ValidationError::DuplicateInput {
                    step_key: "a".into(),
                    input: "x".into()
                },
            ]
        );
    }

    #[test]
    fn dynamic_output_must_be_mapped_or_collected() {
        let mut job = JobBuilder::new("shape");
        let items = job.add_op(OpDef::dynamic("items", noop()), vec![]);
        job.add_op(OpDef::new("direct", noop()), vec![("v", InputSource::Value(items.result()))]);

        let errors = job.build().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].as_label(), "dynamic_output_not_mapped");
    }

    #[test]
    fn plain_output_cannot_be_mapped_or_collected() {
        let mut job = JobBuilder::new("shape");
        let one = job.add_op(OpDef::new("one", noop()), vec![]);
        job.map(OpDef::new("each", noop()), ("v", one.result()), vec![], vec![]);
        job.add_op(OpDef::new("all", noop()), vec![("v", InputSource::Collect(one.result()))]);

        let labels: Vec<_> = job
            .build()
            .unwrap_err()
            .iter()
            .map(|e| e.as_label())
            .collect();
        assert_eq!(labels, vec!["not_dynamic", "not_dynamic"]);
    }

    #[test]
    fn unknown_outputs_and_nested_dynamics_are_rejected() {
        let mut job = JobBuilder::new("refs");
        let items = job.add_op(OpDef::dynamic("items", noop()), vec![]);
        job.add_op(
            OpDef::new("reader", noop()),
            vec![("v", InputSource::Value(items.output("missing")))],
        );
        job.map(OpDef::dynamic("nested", noop()), ("v", items.result()), vec![], vec![]);

        let labels: Vec<_> = job
            .build()
            .unwrap_err()
            .iter()
            .map(|e| e.as_label())
            .collect();
        assert_eq!(labels, vec!["unknown_output", "nested_dynamic"]);
    }

    #[test]
    fn mapped_outputs_fan_out_downstream() {
        let mut job = JobBuilder::new("chain");
        let items = job.add_op(OpDef::dynamic("items", noop()), vec![]);
        let first = job.map(OpDef::new("first", noop()), ("v", items.result()), vec![], vec![]);
        let second = job.map(OpDef::new("second", noop()), ("v", first.result()), vec![], vec![]);
        job.add_op(OpDef::new("all", noop()), vec![("v", InputSource::Collect(second.result()))]);

        let graph = job.build().unwrap();
        assert!(graph.is_fan_out(&first.result()));
        assert_eq!(graph.downstream_nodes(items), vec![first]);
        assert_eq!(graph.node(second).unwrap().upstream_nodes(), vec![first]);
    }
}
