// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Built-in jobs exercising dynamic fan-out, zip and collect.
//!
//! | job                              | shape                                          | result              |
//! |----------------------------------|------------------------------------------------|---------------------|
//! | `basic_example`                  | bases -> map(add_two) -> collect(sum)          | 20                  |
//! | `multiple_upstream_dynamic`      | bases.map(combine, zip multipliers)            | [0, 1, 4, 9, 16]    |
//! | `zip_three_upstream_dynamic`     | bases.map(b*m-s, zip multipliers, subtractors) | [-2, -1, 2, 7, 14]  |
//! | `zip_outputs_from_same_op`       | one op, two dynamic outputs, zipped            | [0, 1, 8, 81, 1024] |
//! | `with_collect`                   | zip three -> collect(sum)                      | 20                  |
//! | `collect_two_dynamic_outputs`    | collect(bases) + collect(multipliers)          | 20                  |

use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::StepContext;
use crate::errors::{StepError, ValidationError};
use crate::graph::{InputSource, JobBuilder, JobGraph, OpDef};
use crate::traits::{Op, OpFn, OpInputs, OpOutput};

const FAN_OUT: i64 = 5;

fn int_input(inputs: &OpInputs, name: &str) -> Result<i64, StepError> {
    inputs
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| StepError::fatal(format!("input '{}' is not an integer", name)))
}

fn int_list_input(inputs: &OpInputs, name: &str) -> Result<Vec<i64>, StepError> {
    inputs
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| StepError::fatal(format!("input '{}' is not a list", name)))?
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| StepError::fatal(format!("input '{}' holds a non-integer", name)))
        })
        .collect()
}

/// Emits `value(i)` under mapping key `{prefix}_{i}` for i in 0..5.
fn emit_range(prefix: &'static str, value: fn(i64) -> i64) -> Arc<dyn Op> {
    OpFn::arc(move |_ctx: StepContext, _inputs: OpInputs| async move {
        let mut out = OpOutput::new();
        for i in 0..FAN_OUT {
            out = out.emit(format!("{}_{}", prefix, i), json!(value(i)));
        }
        Ok(out)
    })
}

fn yield_two_outs() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, _inputs: OpInputs| async move {
        let mut out = OpOutput::new();
        for i in 0..FAN_OUT {
            out = out
                .emit_to("base", format!("base_{}", i), json!(i))
                .emit_to("exp", format!("exp_{}", i + 1), json!(i + 1));
        }
        Ok(out)
    })
}

fn add_two() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
        Ok(OpOutput::value(json!(int_input(&inputs, "base")? + 2)))
    })
}

fn upstream_combiner() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
        let product = int_input(&inputs, "base")? * int_input(&inputs, "multiplier")?;
        Ok(OpOutput::value(json!(product)))
    })
}

/// Non-commutative so that a mis-wired zip shows up in the result.
fn multiply_and_subtract() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
        let base = int_input(&inputs, "base")?;
        let multiplier = int_input(&inputs, "multiplier")?;
        let subtract = int_input(&inputs, "subtract")?;
        Ok(OpOutput::value(json!(base * multiplier - subtract)))
    })
}

fn compute_exponent() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
        let base = int_input(&inputs, "base")?;
        let exponent = int_input(&inputs, "exponent")?;
        let exponent = u32::try_from(exponent)
            .map_err(|_| StepError::fatal(format!("negative exponent {}", exponent)))?;
        let value = base
            .checked_pow(exponent)
            .ok_or_else(|| StepError::fatal(format!("{}^{} overflows", base, exponent)))?;
        Ok(OpOutput::value(json!(value)))
    })
}

fn collect_and_sum() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
        let total: i64 = int_list_input(&inputs, "inputs")?.iter().sum();
        Ok(OpOutput::value(json!(total)))
    })
}

fn collect_two_and_sum() -> Arc<dyn Op> {
    OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
        let total: i64 = int_list_input(&inputs, "input_1")?
            .iter()
            .chain(int_list_input(&inputs, "input_2")?.iter())
            .sum();
        Ok(OpOutput::value(json!(total)))
    })
}

pub fn basic_example() -> Result<JobGraph, Vec<ValidationError>> {
    let mut job = JobBuilder::new("basic_example");
    let bases = job.add_op(OpDef::dynamic("base_upstream", emit_range("base", |i| i)), vec![]);
    let added = job.map(OpDef::new("add_two", add_two()), ("base", bases.result()), vec![], vec![]);
    job.add_op(
        OpDef::new("collect_and_sum", collect_and_sum()),
        vec![("inputs", InputSource::Collect(added.result()))],
    );
    job.build()
}

pub fn multiple_upstream_dynamic() -> Result<JobGraph, Vec<ValidationError>> {
    let mut job = JobBuilder::new("multiple_upstream_dynamic");
    let bases = job.add_op(OpDef::dynamic("base_upstream", emit_range("base", |i| i)), vec![]);
    let multipliers = job.add_op(
        OpDef::dynamic("multiplier_upstream", emit_range("multiply_by", |i| i)),
        vec![],
    );
    job.map(
        OpDef::new("upstream_combiner", upstream_combiner()),
        ("base", bases.result()),
        vec![("multiplier", multipliers.result())],
        vec![],
    );
    job.build()
}

fn zip_three(job: &mut JobBuilder) -> crate::graph::NodeId {
    let bases = job.add_op(OpDef::dynamic("base_upstream", emit_range("base", |i| i)), vec![]);
    let multipliers = job.add_op(
        OpDef::dynamic("multiplier_upstream", emit_range("multiply_by", |i| i)),
        vec![],
    );
    let subtractors = job.add_op(
        OpDef::dynamic("subtract_upstream", emit_range("subtract", |_| 2)),
        vec![],
    );
    job.map(
        OpDef::new("multiply_and_subtract", multiply_and_subtract()),
        ("base", bases.result()),
        vec![
            ("multiplier", multipliers.result()),
            ("subtract", subtractors.result()),
        ],
        vec![],
    )
}

pub fn zip_three_upstream_dynamic() -> Result<JobGraph, Vec<ValidationError>> {
    let mut job = JobBuilder::new("zip_three_upstream_dynamic");
    zip_three(&mut job);
    job.build()
}

pub fn zip_outputs_from_same_op() -> Result<JobGraph, Vec<ValidationError>> {
    let mut job = JobBuilder::new("zip_outputs_from_same_op");
    let outs = job.add_op(
        OpDef::new("yield_two_outs", yield_two_outs()).with_outputs(&[("base", true), ("exp", true)]),
        vec![],
    );
    job.map(
        OpDef::new("compute_exponent", compute_exponent()),
        ("base", outs.output("base")),
        vec![("exponent", outs.output("exp"))],
        vec![],
    );
    job.build()
}

pub fn with_collect() -> Result<JobGraph, Vec<ValidationError>> {
    let mut job = JobBuilder::new("with_collect");
    let res = zip_three(&mut job);
    job.add_op(
        OpDef::new("collect_and_sum", collect_and_sum()),
        vec![("inputs", InputSource::Collect(res.result()))],
    );
    job.build()
}

pub fn collect_two_dynamic_outputs() -> Result<JobGraph, Vec<ValidationError>> {
    let mut job = JobBuilder::new("collect_two_dynamic_outputs");
    let bases = job.add_op(OpDef::dynamic("base_upstream", emit_range("base", |i| i)), vec![]);
    let multipliers = job.add_op(
        OpDef::dynamic("multiplier_upstream", emit_range("multiply_by", |i| i)),
        vec![],
    );
    job.add_op(
        OpDef::new("collect_two_and_sum", collect_two_and_sum()),
        vec![
            ("input_1", InputSource::Collect(bases.result())),
            ("input_2", InputSource::Collect(multipliers.result())),
        ],
    );
    job.build()
}

/// Every demo job, paired with the op whose output it is judged by.
pub fn demo_jobs() -> Result<Vec<(JobGraph, &'static str)>, Vec<ValidationError>> {
    Ok(vec![
        (basic_example()?, "collect_and_sum"),
        (multiple_upstream_dynamic()?, "upstream_combiner"),
        (zip_three_upstream_dynamic()?, "multiply_and_subtract"),
        (zip_outputs_from_same_op()?, "compute_exponent"),
        (with_collect()?, "collect_and_sum"),
        (collect_two_dynamic_outputs()?, "collect_two_and_sum"),
    ])
}
