// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The unit of user computation inside a job.
//!
//! An [`Op`] receives its resolved inputs as JSON values and returns an
//! [`OpOutput`]: named static values plus any [`DynamicOutput`] emissions.
//! Dynamic emissions fan out downstream `map` steps, one per mapping key.
//!
//! ```
//! use serde_json::json;
//! use the_runwood::engine::StepContext;
//! use the_runwood::errors::StepError;
//! use the_runwood::traits::{OpFn, OpInputs, OpOutput};
//!
//! let emit = OpFn::arc(|_ctx: StepContext, _inputs: OpInputs| async move {
//!     let mut out = OpOutput::new();
//!     for i in 0..3 {
//!         out = out.emit(format!("item_{i}"), json!(i));
//!     }
//!     Ok::<_, StepError>(out)
//! });
//! # let _ = emit;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::engine::StepContext;
use crate::errors::StepError;

/// Name of the output an op produces when it declares nothing else.
pub const DEFAULT_OUTPUT: &str = "result";

/// Resolved inputs by input name.
pub type OpInputs = BTreeMap<String, Value>;

/// One mapped emission of a dynamic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicOutput {
    pub value: Value,
    pub output_name: String,
    pub mapping_key: String,
}

/// Everything one op invocation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpOutput {
    pub values: BTreeMap<String, Value>,
    /// In emission order.
    pub dynamic: Vec<DynamicOutput>,
}

impl OpOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single value on the default output.
    pub fn value(value: Value) -> Self {
        Self::new().with_value(DEFAULT_OUTPUT, value)
    }

    pub fn with_value(mut self, output_name: impl Into<String>, value: Value) -> Self {
        self.values.insert(output_name.into(), value);
        self
    }

    /// Emits on the default output.
    pub fn emit(self, mapping_key: impl Into<String>, value: Value) -> Self {
        self.emit_to(DEFAULT_OUTPUT, mapping_key, value)
    }

    pub fn emit_to(
        mut self,
        output_name: impl Into<String>,
        mapping_key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.dynamic.push(DynamicOutput {
            value,
            output_name: output_name.into(),
            mapping_key: mapping_key.into(),
        });
        self
    }
}

#[async_trait]
pub trait Op: Send + Sync {
    async fn compute(&self, ctx: StepContext, inputs: OpInputs) -> Result<OpOutput, StepError>;
}

/// Closure-backed [`Op`]. Each call creates a fresh future.
pub struct OpFn<F> {
    f: F,
}

impl<F, Fut> OpFn<F>
where
    F: Fn(StepContext, OpInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OpOutput, StepError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Op for OpFn<F>
where
    F: Fn(StepContext, OpInputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OpOutput, StepError>> + Send + 'static,
{
    async fn compute(&self, ctx: StepContext, inputs: OpInputs) -> Result<OpOutput, StepError> {
        (self.f)(ctx, inputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builders_fill_default_output() {
        let out = OpOutput::value(json!(3)).emit("a", json!(1)).emit_to("other", "b", json!(2));
        assert_eq!(out.values.get(DEFAULT_OUTPUT), Some(&json!(3)));
        assert_eq!(out.dynamic.len(), 2);
        assert_eq!(out.dynamic[0].output_name, DEFAULT_OUTPUT);
        assert_eq!(out.dynamic[1].mapping_key, "b");
    }

    #[tokio::test]
    async fn closure_op_runs() {
        let op = OpFn::arc(|_ctx: StepContext, inputs: OpInputs| async move {
            let x = inputs.get("x").and_then(Value::as_i64).unwrap_or_default();
            Ok(OpOutput::value(json!(x + 2)))
        });
        let mut inputs = OpInputs::new();
        inputs.insert("x".into(), json!(5));
        let out = op.compute(StepContext::detached("r", "add_two"), inputs).await.unwrap();
        assert_eq!(out.values[DEFAULT_OUTPUT], json!(7));
    }
}
