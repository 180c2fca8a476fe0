//! `EchoAgent` answers every invocation with what it was asked, for dry runs.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{AgentError, AgentExecutor, BoundInputs, InvocationContext};

/// Returns `{ "agent": <step label>, "inputs": { ... } }` without doing any work.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAgent;

#[async_trait]
impl AgentExecutor for EchoAgent {
    async fn invoke(
        &self,
        step_label: &str,
        inputs: &BoundInputs,
        _ctx: &InvocationContext,
    ) -> Result<Value, AgentError> {
        Ok(json!({ "agent": step_label, "inputs": inputs }))
    }
}
