// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use tokio_util::sync::CancellationToken;

/// What an op knows about the step it is running as.
///
/// The cancellation token is the run's token: it fires when termination of the
/// run is requested. Ops with long-running work should watch [`StepContext::cancelled`].
#[derive(Clone, Debug)]
pub struct StepContext {
    run_id: String,
    step_key: String,
    mapping_key: Option<String>,
    attempt: u32,
    cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        run_id: impl Into<String>,
        step_key: impl Into<String>,
        mapping_key: Option<String>,
        attempt: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_key: step_key.into(),
            mapping_key,
            attempt,
            cancel,
        }
    }

    /// A first-attempt context with its own token, for calling ops outside an executor.
    pub fn detached(run_id: impl Into<String>, step_key: impl Into<String>) -> Self {
        Self::new(run_id, step_key, None, 1, CancellationToken::new())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn step_key(&self) -> &str {
        &self.step_key
    }

    pub fn mapping_key(&self) -> Option<&str> {
        self.mapping_key.as_deref()
    }

    /// 1 for the first execution, incremented on each retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
