//! Core domain models for the flow engine.
//!
//! These types are the source of truth for what a workflow tree looks like in
//! memory. They serialise to/from the JSON document the editor and storage
//! layers exchange with the engine, and the same type carries execution
//! results once a run has annotated it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{Field, NodePath, Segment};
use crate::result::{NodeOutcome, NodeStatus};
use crate::variables::FlowInputVariable;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Ordered mapping of declared input names to where their values come from.
pub type InputSpec = IndexMap<String, InputSource>;

/// Where a single input value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// A fixed value, used as-is.
    Literal { value: Value },
    /// The output of an already-executed node, e.g. `$.input[0]`.
    Path { path: String },
    /// A flow input variable bound for this run.
    Variable { name: String },
    /// The current element of the innermost enclosing loop.
    Element,
    /// A nested agent call whose output becomes the input value.
    Step { node: Box<WorkflowNode> },
}

impl InputSource {
    pub fn literal(value: impl Into<Value>) -> Self {
        InputSource::Literal { value: value.into() }
    }

    pub fn path(path: impl Into<String>) -> Self {
        InputSource::Path { path: path.into() }
    }

    pub fn var(name: impl Into<String>) -> Self {
        InputSource::Variable { name: name.into() }
    }

    pub fn step(node: WorkflowNode) -> Self {
        InputSource::Step { node: Box::new(node) }
    }
}

// ---------------------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------------------

/// One candidate of a [`StepKind::Branch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCase {
    /// Selected when the branch condition evaluates to exactly this value.
    pub when: Value,
    pub node: WorkflowNode,
}

/// What a node does when executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stepKind", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke one agent with resolved inputs.
    Agent {
        /// Step label handed to the agent executor.
        agent: String,
        #[serde(default)]
        inputs: InputSpec,
        #[serde(default, rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Run children one at a time, in order.
    Sequence { children: Vec<WorkflowNode> },
    /// Run exactly one candidate, picked by comparing `condition` against each case.
    Branch {
        condition: InputSource,
        cases: Vec<BranchCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<WorkflowNode>>,
    },
    /// Run `body` once per element of the array `source` evaluates to.
    Loop {
        source: InputSource,
        body: Box<WorkflowNode>,
        /// Materialised iterations; only present on result trees.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        instances: Vec<WorkflowNode>,
    },
}

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

/// A node of the workflow tree. Every node exclusively owns its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Stable identifier, assigned once by [`crate::assign_identities`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Breadcrumb derived by [`crate::derive_names`] for agent nodes.
    ///
    /// Always rewritten on agent nodes, so an authored value does not stick
    /// there; set `name` instead. Container nodes keep whatever is authored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Display override for this node's own segment of the breadcrumb. This
    /// is the only authored override the Namer honours on agent nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub step: StepKind,
    /// Attached by the executor; absent on definition trees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<NodeOutcome>,
}

impl WorkflowNode {
    fn bare(step: StepKind) -> Self {
        Self {
            id: None,
            label: None,
            name: None,
            step,
            result: None,
        }
    }

    /// An agent step with no inputs.
    pub fn agent(agent: impl Into<String>) -> Self {
        Self::bare(StepKind::Agent {
            agent: agent.into(),
            inputs: InputSpec::new(),
            timeout_ms: None,
        })
    }

    pub fn sequence(children: Vec<WorkflowNode>) -> Self {
        Self::bare(StepKind::Sequence { children })
    }

    pub fn branch(
        condition: InputSource,
        cases: Vec<BranchCase>,
        default: Option<WorkflowNode>,
    ) -> Self {
        Self::bare(StepKind::Branch {
            condition,
            cases,
            default: default.map(Box::new),
        })
    }

    pub fn loop_over(source: InputSource, body: WorkflowNode) -> Self {
        Self::bare(StepKind::Loop {
            source,
            body: Box::new(body),
            instances: Vec::new(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append an input to an agent step. Ignored on container nodes.
    pub fn with_input(mut self, name: impl Into<String>, source: InputSource) -> Self {
        if let StepKind::Agent { inputs, .. } = &mut self.step {
            inputs.insert(name.into(), source);
        }
        self
    }

    /// Set the per-invocation timeout of an agent step. Ignored on container nodes.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        if let StepKind::Agent { timeout_ms, .. } = &mut self.step {
            *timeout_ms = Some(ms);
        }
        self
    }

    /// A copy of this node's identity fields around a different step.
    pub(crate) fn rebuild(&self, step: StepKind) -> WorkflowNode {
        WorkflowNode {
            id: self.id.clone(),
            label: self.label.clone(),
            name: self.name.clone(),
            step,
            result: None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.step {
            StepKind::Agent { .. } => "agent",
            StepKind::Sequence { .. } => "sequence",
            StepKind::Branch { .. } => "branch",
            StepKind::Loop { .. } => "loop",
        }
    }

    /// The segment this node contributes to breadcrumbs; `None` for containers.
    pub fn step_label(&self) -> Option<&str> {
        match &self.step {
            StepKind::Agent { agent, .. } => Some(self.name.as_deref().unwrap_or(agent)),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<NodeStatus> {
        self.result.as_ref().map(|r| r.status)
    }

    pub fn output(&self) -> Option<&Value> {
        self.result.as_ref().and_then(|r| r.output.as_ref())
    }

    /// Direct child addressed by `field[index]`, if any.
    ///
    /// Agent inputs are addressable only when they hold a nested step. A loop
    /// exposes its instances once it has run and its body before that.
    pub fn child(&self, field: Field, index: usize) -> Option<&WorkflowNode> {
        match (&self.step, field) {
            (StepKind::Agent { inputs, .. }, Field::Input) => match inputs.get_index(index) {
                Some((_, InputSource::Step { node })) => Some(node),
                _ => None,
            },
            (StepKind::Sequence { children }, Field::Input) => children.get(index),
            (StepKind::Branch { cases, default, .. }, Field::Input) => match cases.get(index) {
                Some(case) => Some(&case.node),
                None if index == cases.len() => default.as_deref(),
                None => None,
            },
            (StepKind::Loop { body, instances, .. }, Field::Item) => {
                if instances.is_empty() {
                    (index == 0).then_some(body.as_ref())
                } else {
                    instances.get(index)
                }
            }
            _ => None,
        }
    }

    /// Number of addressable slots under `field` (including non-step agent inputs).
    pub fn child_count(&self, field: Field) -> usize {
        match (&self.step, field) {
            (StepKind::Agent { inputs, .. }, Field::Input) => inputs.len(),
            (StepKind::Sequence { children }, Field::Input) => children.len(),
            (StepKind::Branch { cases, default, .. }, Field::Input) => {
                cases.len() + usize::from(default.is_some())
            }
            (StepKind::Loop { instances, .. }, Field::Item) => instances.len().max(1),
            _ => 0,
        }
    }

    /// All direct children with the segment that addresses each.
    pub fn children(&self) -> Vec<(Segment, &WorkflowNode)> {
        match &self.step {
            StepKind::Agent { inputs, .. } => inputs
                .values()
                .enumerate()
                .filter_map(|(i, source)| match source {
                    InputSource::Step { node } => Some((Segment::input(i), node.as_ref())),
                    _ => None,
                })
                .collect(),
            StepKind::Sequence { children } => children
                .iter()
                .enumerate()
                .map(|(i, child)| (Segment::input(i), child))
                .collect(),
            StepKind::Branch { cases, default, .. } => cases
                .iter()
                .map(|case| &case.node)
                .chain(default.as_deref())
                .enumerate()
                .map(|(i, child)| (Segment::input(i), child))
                .collect(),
            StepKind::Loop { body, instances, .. } => {
                if instances.is_empty() {
                    vec![(Segment::item(0), body.as_ref())]
                } else {
                    instances
                        .iter()
                        .enumerate()
                        .map(|(k, instance)| (Segment::item(k), instance))
                        .collect()
                }
            }
        }
    }

    /// Mutable counterpart of [`WorkflowNode::children`].
    pub fn children_mut(&mut self) -> Vec<(Segment, &mut WorkflowNode)> {
        match &mut self.step {
            StepKind::Agent { inputs, .. } => inputs
                .values_mut()
                .enumerate()
                .filter_map(|(i, source)| match source {
                    InputSource::Step { node } => Some((Segment::input(i), node.as_mut())),
                    _ => None,
                })
                .collect(),
            StepKind::Sequence { children } => children
                .iter_mut()
                .enumerate()
                .map(|(i, child)| (Segment::input(i), child))
                .collect(),
            StepKind::Branch { cases, default, .. } => cases
                .iter_mut()
                .map(|case| &mut case.node)
                .chain(default.as_deref_mut())
                .enumerate()
                .map(|(i, child)| (Segment::input(i), child))
                .collect(),
            StepKind::Loop { body, instances, .. } => {
                if instances.is_empty() {
                    vec![(Segment::item(0), body.as_mut())]
                } else {
                    instances
                        .iter_mut()
                        .enumerate()
                        .map(|(k, instance)| (Segment::item(k), instance))
                        .collect()
                }
            }
        }
    }

    /// Depth-first pre-order walk, yielding each node with its path.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&NodePath, &'a WorkflowNode)) {
        self.walk_from(&NodePath::root(), visit);
    }

    fn walk_from<'a>(&'a self, path: &NodePath, visit: &mut impl FnMut(&NodePath, &'a WorkflowNode)) {
        visit(path, self);
        for (segment, child) in self.children() {
            child.walk_from(&path.join(segment), visit);
        }
    }
}

// ---------------------------------------------------------------------------
// FlowDefinition
// ---------------------------------------------------------------------------

/// A complete flow document: declared variables plus the workflow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<FlowInputVariable>,
    pub root: WorkflowNode,
}
