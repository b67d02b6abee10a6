// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Expansion of graph nodes into concrete step invocations.
//!
//! A node is expanded once every upstream node has finished, at which point
//! the number of emissions on each fan-out output is known:
//!
//! ```text
//! items ──emit base_0..base_4──► add_two[base_0] .. add_two[base_4] ──collect──► sum
//! ```
//!
//! * A single node becomes one step keyed by the op name.
//! * A mapped node becomes one step per emission of its primary source, keyed
//!   `"{op}[{mapping_key}]"`. `zip_with` sources are paired by position; the
//!   primary source's mapping keys name the steps.
//! * `Collect` inputs receive every emission as a JSON array, in emission order.
//! * A mapped node's own output is again a fan-out, keyed by the primary
//!   source's mapping keys, so mapped nodes can be mapped or collected further.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::errors::{StepError, ValidationError};
use crate::graph::{InputSource, Invocation, JobGraph, NodeId, OpNode, OutputRef};
use crate::traits::{OpInputs, OpOutput};

#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub mapping_key: String,
    pub value: Value,
}

/// The result of a finished node on one of its outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    Single(Value),
    FanOut(Vec<Emission>),
}

pub type NodeOutputs = BTreeMap<String, NodeOutput>;

/// One step the executor will run for a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub step_key: String,
    pub mapping_key: Option<String>,
    pub inputs: OpInputs,
}

/// An op returned something that does not match its declared outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputError {
    Contract(StepError),
    Validation(ValidationError),
}

pub fn mapped_step_key(op_name: &str, mapping_key: &str) -> String {
    format!("{}[{}]", op_name, mapping_key)
}

/// Mapping keys are non-empty and limited to `[A-Za-z0-9_]`.
pub fn is_valid_mapping_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Plans the steps of `node` from the outputs of its finished upstream nodes.
pub fn expand_node(
    graph: &JobGraph,
    node: &OpNode,
    results: &HashMap<NodeId, NodeOutputs>,
) -> Result<Vec<PlannedStep>, ValidationError> {
    let mut shared = OpInputs::new();
    for (name, source) in &node.inputs {
        shared.insert(name.clone(), resolve_input(graph, node, source, results)?);
    }

    let (over, zip_with) = match &node.invocation {
        Invocation::Single => {
            return Ok(vec![PlannedStep {
                step_key: node.name().to_string(),
                mapping_key: None,
                inputs: shared,
            }]);
        }
        Invocation::Mapped { over, zip_with } => (over, zip_with),
    };

    let primary = fan_out(graph, node, &over.1, results)?;
    let mut zipped = Vec::with_capacity(zip_with.len());
    for (name, source) in zip_with {
        zipped.push((name, fan_out(graph, node, source, results)?));
    }

    if zipped.iter().any(|(_, emissions)| emissions.len() != primary.len()) {
        let mut counts = vec![(producer_label(graph, &over.1), primary.len())];
        counts.extend(
            zip_with
                .iter()
                .zip(&zipped)
                .map(|((_, source), (_, emissions))| (producer_label(graph, source), emissions.len())),
        );
        return Err(ValidationError::ZipCountMismatch {
            step_key: node.name().to_string(),
            counts,
        });
    }

    let steps = primary
        .iter()
        .enumerate()
        .map(|(i, emission)| {
            let mut inputs = shared.clone();
            inputs.insert(over.0.clone(), emission.value.clone());
            for (name, emissions) in &zipped {
                inputs.insert((*name).clone(), emissions[i].value.clone());
            }
            PlannedStep {
                step_key: mapped_step_key(node.name(), &emission.mapping_key),
                mapping_key: Some(emission.mapping_key.clone()),
                inputs,
            }
        })
        .collect();
    Ok(steps)
}

fn resolve_input(
    graph: &JobGraph,
    node: &OpNode,
    source: &InputSource,
    results: &HashMap<NodeId, NodeOutputs>,
) -> Result<Value, ValidationError> {
    match source {
        InputSource::Value(output) => match lookup(graph, node, output, results)? {
            NodeOutput::Single(value) => Ok(value.clone()),
            NodeOutput::FanOut(_) => Err(ValidationError::DynamicOutputNotMapped {
                step_key: node.name().to_string(),
                upstream: upstream_name(graph, output),
                output: output.output.clone(),
            }),
        },
        InputSource::Collect(output) => {
            let emissions = fan_out(graph, node, output, results)?;
            Ok(Value::Array(emissions.iter().map(|e| e.value.clone()).collect()))
        }
    }
}

fn fan_out<'a>(
    graph: &JobGraph,
    node: &OpNode,
    output: &OutputRef,
    results: &'a HashMap<NodeId, NodeOutputs>,
) -> Result<&'a [Emission], ValidationError> {
    match lookup(graph, node, output, results)? {
        NodeOutput::FanOut(emissions) => Ok(emissions),
        NodeOutput::Single(_) => Err(ValidationError::NotDynamic {
            step_key: node.name().to_string(),
            upstream: upstream_name(graph, output),
            output: output.output.clone(),
        }),
    }
}

fn lookup<'a>(
    graph: &JobGraph,
    node: &OpNode,
    output: &OutputRef,
    results: &'a HashMap<NodeId, NodeOutputs>,
) -> Result<&'a NodeOutput, ValidationError> {
    results
        .get(&output.node)
        .and_then(|outputs| outputs.get(&output.output))
        .ok_or_else(|| ValidationError::UnknownOutput {
            step_key: node.name().to_string(),
            upstream: upstream_name(graph, output),
            output: output.output.clone(),
        })
}

fn upstream_name(graph: &JobGraph, output: &OutputRef) -> String {
    graph
        .node(output.node)
        .map(|n| n.name().to_string())
        .unwrap_or_else(|| format!("#{}", output.node.0))
}

fn producer_label(graph: &JobGraph, output: &OutputRef) -> String {
    format!("{}.{}", upstream_name(graph, output), output.output)
}

/// Checks mapping keys of one step's emissions.
pub fn validate_emissions<'a>(
    step_key: &str,
    output_name: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for key in keys {
        if !is_valid_mapping_key(key) {
            return Err(ValidationError::InvalidMappingKey {
                step_key: step_key.to_string(),
                mapping_key: key.to_string(),
            });
        }
        if !seen.insert(key) {
            return Err(ValidationError::DuplicateMappingKey {
                step_key: step_key.to_string(),
                output: output_name.to_string(),
                mapping_key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// Converts what a single (unmapped) step returned into node outputs.
pub fn outputs_from_op(node: &OpNode, step_key: &str, output: OpOutput) -> Result<NodeOutputs, OutputError> {
    let OpOutput { mut values, dynamic } = output;
    let mut outputs = NodeOutputs::new();

    for emission in &dynamic {
        let declared = node.def.output_def(&emission.output_name);
        if !declared.map_or(false, |o| o.dynamic) {
            return Err(OutputError::Contract(StepError::fatal(format!(
                "op '{}' emitted on '{}' which is not a declared dynamic output",
                node.name(),
                emission.output_name
            ))));
        }
    }

    for def in &node.def.outputs {
        if def.dynamic {
            if values.contains_key(&def.name) {
                return Err(OutputError::Contract(StepError::fatal(format!(
                    "op '{}' returned a plain value for dynamic output '{}'",
                    node.name(),
                    def.name
                ))));
            }
            let emissions: Vec<Emission> = dynamic
                .iter()
                .filter(|e| e.output_name == def.name)
                .map(|e| Emission {
                    mapping_key: e.mapping_key.clone(),
                    value: e.value.clone(),
                })
                .collect();
            validate_emissions(step_key, &def.name, emissions.iter().map(|e| e.mapping_key.as_str()))
                .map_err(OutputError::Validation)?;
            outputs.insert(def.name.clone(), NodeOutput::FanOut(emissions));
        } else {
            let value = values.remove(&def.name).ok_or_else(|| {
                OutputError::Contract(StepError::fatal(format!(
                    "op '{}' did not produce output '{}'",
                    node.name(),
                    def.name
                )))
            })?;
            outputs.insert(def.name.clone(), NodeOutput::Single(value));
        }
    }

    if let Some(extra) = values.keys().next() {
        return Err(OutputError::Contract(StepError::fatal(format!(
            "op '{}' produced undeclared output '{}'",
            node.name(),
            extra
        ))));
    }
    Ok(outputs)
}

/// Gathers the per-step values of a mapped node, in primary emission order,
/// into fan-out outputs keyed by mapping key.
pub fn gather_mapped(node: &OpNode, per_step: &[(String, NodeOutputs)]) -> NodeOutputs {
    node.def
        .outputs
        .iter()
        .map(|def| {
            let emissions = per_step
                .iter()
                .filter_map(|(mapping_key, outputs)| match outputs.get(&def.name) {
                    Some(NodeOutput::Single(value)) => Some(Emission {
                        mapping_key: mapping_key.clone(),
                        value: value.clone(),
                    }),
                    _ => None,
                })
                .collect();
            (def.name.clone(), NodeOutput::FanOut(emissions))
        })
        .collect()
}
