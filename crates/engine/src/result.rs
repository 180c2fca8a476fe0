//! Execution results: per-node outcomes, run reports and progress events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{NodeError, PathError};
use crate::models::WorkflowNode;
use crate::path::{resolve_path, NodePath};

/// Lifecycle of a node within one run:
/// `Pending → Running → {Succeeded, Failed, Skipped, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
            NodeStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Pending | NodeStatus::Running)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one node. Created when the node reaches a terminal
/// status and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcome {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Agent invocations made for this node (0 for containers and reused outputs).
    #[serde(default)]
    pub attempts: u32,
    /// Output carried over from a previous run instead of invoking the agent.
    #[serde(default)]
    pub reused: bool,
}

impl NodeOutcome {
    fn finished(status: NodeStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            status,
            output: None,
            error: None,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            attempts: 0,
            reused: false,
        }
    }

    pub fn succeeded(output: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            output: Some(output),
            ..Self::finished(NodeStatus::Succeeded, started_at)
        }
    }

    pub fn failed(error: NodeError, started_at: DateTime<Utc>) -> Self {
        Self {
            error: Some(error),
            ..Self::finished(NodeStatus::Failed, started_at)
        }
    }

    /// Cancelled after the node had started running.
    pub fn cancelled(started_at: DateTime<Utc>) -> Self {
        Self::finished(NodeStatus::Cancelled, started_at)
    }

    /// A node that never started (`Skipped` or `Cancelled` while pending).
    pub fn untouched(status: NodeStatus) -> Self {
        Self {
            status,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
            attempts: 0,
            reused: false,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn reused(mut self) -> Self {
        self.reused = true;
        self
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<Option<NodeStatus>> for RunStatus {
    fn from(root: Option<NodeStatus>) -> Self {
        match root {
            Some(NodeStatus::Succeeded) => RunStatus::Succeeded,
            Some(NodeStatus::Cancelled) => RunStatus::Cancelled,
            _ => RunStatus::Failed,
        }
    }
}

/// A failed node that caused (rather than merely propagated) a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureSite<'a> {
    pub path: NodePath,
    pub label: Option<&'a str>,
    pub error: &'a NodeError,
}

/// The result of running a full workflow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// The input tree annotated with a `result` on every node.
    pub root: WorkflowNode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// The node (with its result) at `path`.
    ///
    /// # Errors
    /// Same as [`resolve_path`].
    pub fn get(&self, path: &str) -> Result<&WorkflowNode, PathError> {
        resolve_path(&self.root, path)
    }

    /// Output of the root node, if it succeeded.
    pub fn output(&self) -> Option<&Value> {
        self.root.output()
    }

    /// Every failed node whose error originated there, in tree order.
    pub fn failures(&self) -> Vec<FailureSite<'_>> {
        let mut sites = Vec::new();
        self.root.walk(&mut |path, node| {
            if let Some(error) = node.result.as_ref().and_then(|r| r.error.as_ref()) {
                if !error.is_propagated() {
                    sites.push(FailureSite {
                        path: path.clone(),
                        label: node.label.as_deref(),
                        error,
                    });
                }
            }
        });
        sites
    }
}

/// A node status transition, published for progress reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEvent {
    pub run_id: Uuid,
    pub node_id: String,
    pub path: NodePath,
    pub label: Option<String>,
    pub status: NodeStatus,
    pub at: DateTime<Utc>,
}
