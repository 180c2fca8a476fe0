//! `MockAgent`: a test double for `AgentExecutor`.
//!
//! Useful in unit and integration tests where a real agent backend is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{AgentError, AgentExecutor, BoundInputs, InvocationContext};

/// Behaviour injected into `MockAgent` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Return the value of the named input (or `null` if absent).
    Echo(String),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `failures` calls, then return the value.
    Flaky { failures: usize, value: Value },
}

/// A mock agent that records every call it receives and returns a
/// programmer-specified result.
pub struct MockAgent {
    /// Label used in test assertions.
    pub name: String,
    /// What the agent will do when `invoke` is called.
    pub behaviour: MockBehaviour,
    /// Simulated latency applied before every response.
    pub delay: Option<Duration>,
    /// All inputs seen by this agent (in call order).
    pub calls: Arc<Mutex<Vec<BoundInputs>>>,
}

impl MockAgent {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that answers with one of its own inputs.
    pub fn echoing(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Echo(input.into()))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times with a `Retryable` error before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times this agent has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Snapshot of every input map this agent received.
    pub fn recorded_calls(&self) -> Vec<BoundInputs> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for MockAgent {
    async fn invoke(
        &self,
        _step_label: &str,
        inputs: &BoundInputs,
        _ctx: &InvocationContext,
    ) -> Result<Value, AgentError> {
        let seen = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(inputs.clone());
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Echo(key) => Ok(inputs.get(key).cloned().unwrap_or(Value::Null)),
            MockBehaviour::FailRetryable(msg) => Err(AgentError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(AgentError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if seen <= *failures {
                    Err(AgentError::Retryable(format!("{} attempt {seen} failed", self.name)))
                } else {
                    Ok(value.clone())
                }
            }
        }
    }
}
