//! Engine-level error types.
//!
//! Node-level failures ([`NodeError`], [`BindingError`]) are data: they are
//! attached to the failed node in the result tree and never abort the run.
//! Only [`RunError`] is surfaced to the caller as a failed call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::result::{NodeStatus, RunReport};

/// Errors produced while parsing or resolving a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathError {
    /// The expression is not syntactically valid; nothing was traversed.
    #[error("malformed path '{path}': {reason}")]
    Malformed { path: String, reason: String },

    /// The expression is valid but segment `index` does not resolve.
    #[error("path '{path}' not found at segment {index} ('{segment}'): {reason}")]
    NotFound {
        path: String,
        segment: String,
        index: usize,
        reason: String,
    },
}

/// Why a step's inputs could not be bound. Raised before any agent is invoked.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BindingError {
    #[error("input '{input}': required variable '{variable}' has no value")]
    MissingVariable { input: String, variable: String },

    #[error("input '{input}': variable '{variable}' is not declared by the flow")]
    UnknownVariable { input: String, variable: String },

    #[error("input '{input}': variable '{variable}' expects {expected}, got {found}")]
    TypeMismatch {
        input: String,
        variable: String,
        expected: String,
        found: String,
    },

    /// A path reference was malformed or pointed nowhere.
    #[error("input '{input}': {error}")]
    Path { input: String, error: PathError },

    #[error("input '{input}': '{path}' has not executed yet")]
    NotExecuted { input: String, path: String },

    #[error("input '{input}': '{path}' finished as {status}")]
    Unsuccessful {
        input: String,
        path: String,
        status: NodeStatus,
    },

    #[error("input '{input}': nested step '{path}' finished as {status}")]
    NestedStep {
        input: String,
        path: String,
        status: NodeStatus,
    },

    #[error("input '{input}': no enclosing loop element")]
    NoLoopElement { input: String },

    #[error("input '{input}': nested steps are only allowed as agent inputs")]
    StepNotAllowed { input: String },

    #[error("input '{input}': expected an array to iterate, got {found}")]
    NotIterable { input: String, found: String },
}

impl BindingError {
    /// Name of the input (or `condition` / `source`) that failed to bind.
    pub fn input(&self) -> &str {
        match self {
            BindingError::MissingVariable { input, .. }
            | BindingError::UnknownVariable { input, .. }
            | BindingError::TypeMismatch { input, .. }
            | BindingError::Path { input, .. }
            | BindingError::NotExecuted { input, .. }
            | BindingError::Unsuccessful { input, .. }
            | BindingError::NestedStep { input, .. }
            | BindingError::NoLoopElement { input }
            | BindingError::StepNotAllowed { input }
            | BindingError::NotIterable { input, .. } => input,
        }
    }
}

/// Failure marker attached to a `Failed` node.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NodeError {
    #[error("binding failed: {0}")]
    Binding(#[from] BindingError),

    /// The agent executor reported failure; the message is passed through untouched.
    #[error("agent failed after {attempts} attempt(s): {message}")]
    Executor {
        message: String,
        retryable: bool,
        attempts: u32,
    },

    #[error("agent invocation exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("no branch matched condition value {value}")]
    NoBranchMatched { value: Value },

    /// A sequence child or the selected branch candidate failed.
    #[error("child '{path}' failed")]
    ChildFailed { path: String },

    #[error("loop instances {indices:?} failed")]
    InstancesFailed { indices: Vec<usize> },
}

impl NodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Binding(_) => "binding",
            NodeError::Executor { .. } => "executor",
            NodeError::Timeout { .. } => "timeout",
            NodeError::NoBranchMatched { .. } => "no_branch_matched",
            NodeError::ChildFailed { .. } => "child_failed",
            NodeError::InstancesFailed { .. } => "instances_failed",
        }
    }

    /// `true` for markers that only report a failure further down the tree.
    pub fn is_propagated(&self) -> bool {
        matches!(self, NodeError::ChildFailed { .. } | NodeError::InstancesFailed { .. })
    }
}

/// Contract violations in the shape of a workflow tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Two nodes share an ID, typically a subtree pasted twice.
    #[error("duplicate node ID '{id}' at '{first}' and '{second}'")]
    DuplicateNodeId {
        id: String,
        first: String,
        second: String,
    },

    #[error("node at '{path}' has no ID")]
    MissingNodeId { path: String },
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid workflow tree: {0}")]
    InvalidTree(#[from] TreeError),

    /// Cancellation was requested; the partial report is still available.
    #[error("run {} was cancelled", .report.run_id)]
    Cancelled { report: Box<RunReport> },
}
