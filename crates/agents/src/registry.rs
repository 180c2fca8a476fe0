//! Dispatch agent invocations by step label.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{AgentError, AgentExecutor, BoundInputs, InvocationContext};

/// Maps step labels to `AgentExecutor` implementations.
///
/// The registry is itself an `AgentExecutor`, so a flow can be run against a
/// set of per-agent backends without the engine knowing about them.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentExecutor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under `step_label`, replacing any previous entry.
    pub fn register(&mut self, step_label: impl Into<String>, agent: Arc<dyn AgentExecutor>) {
        self.agents.insert(step_label.into(), agent);
    }

    /// Builder-style variant of [`AgentRegistry::register`].
    pub fn with(mut self, step_label: impl Into<String>, agent: Arc<dyn AgentExecutor>) -> Self {
        self.register(step_label, agent);
        self
    }

    pub fn contains(&self, step_label: &str) -> bool {
        self.agents.contains_key(step_label)
    }
}

#[async_trait]
impl AgentExecutor for AgentRegistry {
    async fn invoke(
        &self,
        step_label: &str,
        inputs: &BoundInputs,
        ctx: &InvocationContext,
    ) -> Result<Value, AgentError> {
        let agent = self.agents.get(step_label).ok_or_else(|| {
            AgentError::Fatal(format!("no agent registered for step '{step_label}'"))
        })?;
        debug!(step = step_label, path = %ctx.path, "dispatching agent");
        agent.invoke(step_label, inputs, ctx).await
    }
}
