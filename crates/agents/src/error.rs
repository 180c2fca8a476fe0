//! Agent-level error type.

use thiserror::Error;

/// Errors returned by an agent's `invoke` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: the invocation is attempted again with exponential back-off.
/// - `Fatal`: the step is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Transient failure; the engine may try the invocation again.
    #[error("retryable agent error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal agent error: {0}")]
    Fatal(String),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Retryable(_))
    }

    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            AgentError::Retryable(msg) | AgentError::Fatal(msg) => msg,
        }
    }
}
