//! The `AgentExecutor` trait, the contract every agent backend must fulfil.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::AgentError;

/// Inputs handed to an agent, in the order the step declared them.
pub type BoundInputs = IndexMap<String, Value>;

/// Per-invocation context passed alongside the bound inputs.
///
/// Defined here (in the agents crate) so both the engine and individual agent
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// ID of the current run.
    pub run_id: uuid::Uuid,
    /// Stable ID of the step being executed.
    pub node_id: String,
    /// Path expression of the step within the run's result tree.
    pub path: String,
    /// Breadcrumb label of the step, if derived.
    pub label: Option<String>,
    /// 1-based attempt number; greater than 1 only after retryable failures.
    pub attempt: u32,
}

/// The agent-executor capability.
///
/// Implementations may block for a long time (LLM calls, remote tools); the
/// engine wraps each call with its timeout and cancellation handling.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run the agent identified by `step_label` with the resolved `inputs` and
    /// return its output payload.
    async fn invoke(
        &self,
        step_label: &str,
        inputs: &BoundInputs,
        ctx: &InvocationContext,
    ) -> Result<Value, AgentError>;
}
