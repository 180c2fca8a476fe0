//! Flow execution engine.
//!
//! `FlowExecutor` is the central orchestrator:
//! 1. Assigns identities and derives labels for the incoming tree.
//! 2. Walks the tree honouring each node's step kind, binding inputs against
//!    the results recorded so far.
//! 3. Dispatches agent steps through the `AgentExecutor` capability, retrying
//!    `AgentError::Retryable` failures with exponential back-off.
//! 4. Returns the input tree annotated with a result on every node.
//!
//! Node failures never abort the walk; they are recorded on the node and
//! propagate upward through the parent's control-flow rules. Only
//! cancellation and an invalid tree surface as [`RunError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use agents::{AgentExecutor, BoundInputs, InvocationContext};

use crate::binder::{InputBinder, LoopFrame, ResultStore};
use crate::error::{BindingError, NodeError, RunError};
use crate::identity::assign_identities;
use crate::models::{BranchCase, InputSource, InputSpec, StepKind, WorkflowNode};
use crate::naming::derive_names;
use crate::path::{Field, NodePath};
use crate::result::{NodeEvent, NodeOutcome, NodeStatus, RunReport, RunStatus};
use crate::variables::BoundVariables;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable agent failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay_ms: u64,
    /// Upper bound on loop instances in flight at once.
    pub max_loop_concurrency: usize,
    /// Per-attempt timeout for agent steps that do not set `timeoutMs`.
    pub default_step_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 100,
            max_loop_concurrency: 4,
            default_step_timeout_ms: None,
        }
    }
}

impl ExecutorConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Read-only state shared by every node of one run.
struct RunScope<'a> {
    run_id: Uuid,
    /// The annotated definition tree, used to validate path references.
    root: &'a WorkflowNode,
    variables: &'a BoundVariables,
    cancel: &'a CancellationToken,
    /// Outputs offered for reuse by `resume`: path -> (node id, output).
    prior: &'a HashMap<NodePath, (String, Value)>,
}

/// Mutable state visible from one point of the walk. Loop instances get
/// their own copy so they never observe each other.
#[derive(Debug, Clone, Default)]
struct Frame {
    store: ResultStore,
    loops: Vec<LoopFrame>,
}

/// How a single agent invocation (including retries) ended.
enum Invocation {
    Done(Value),
    Failed(NodeError),
    Cancelled,
}

// ---------------------------------------------------------------------------
// FlowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs workflow trees against an agent backend.
///
/// Construct one executor per process (or even per run) and call
/// [`FlowExecutor::execute`] with the tree and its bound variables.
pub struct FlowExecutor {
    agent: Arc<dyn AgentExecutor>,
    config: ExecutorConfig,
    progress: Option<UnboundedSender<NodeEvent>>,
}

impl FlowExecutor {
    /// Create a new executor.
    pub fn new(agent: Arc<dyn AgentExecutor>, config: ExecutorConfig) -> Self {
        Self {
            agent,
            config,
            progress: None,
        }
    }

    /// Publish every node status transition on `sender`.
    pub fn with_progress(mut self, sender: UnboundedSender<NodeEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `tree` to completion and return the annotated result tree.
    ///
    /// # Errors
    /// - [`RunError::InvalidTree`] if the tree has duplicate node IDs.
    /// - [`RunError::Cancelled`] if `cancel` fired; the partial report is attached.
    pub async fn execute(
        &self,
        tree: WorkflowNode,
        variables: &BoundVariables,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.run(tree, variables, None, cancel).await
    }

    /// Re-run `tree`, reusing the output of every agent node that succeeded in
    /// `prior` at the same path with the same ID. Nothing is invoked for
    /// reused nodes; everything else runs as in [`FlowExecutor::execute`].
    ///
    /// # Errors
    /// Same as [`FlowExecutor::execute`].
    pub async fn resume(
        &self,
        tree: WorkflowNode,
        variables: &BoundVariables,
        prior: &WorkflowNode,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.run(tree, variables, Some(prior), cancel).await
    }

    #[instrument(skip_all, fields(run_id = tracing::field::Empty, resume = prior.is_some()))]
    async fn run(
        &self,
        tree: WorkflowNode,
        variables: &BoundVariables,
        prior: Option<&WorkflowNode>,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        let tree = derive_names(assign_identities(as_definition(tree))?);

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let missing = variables.missing_required();
        if !missing.is_empty() {
            warn!("required variables without a value: {:?}", missing);
        }

        let reusable = prior.map(reusable_outputs).unwrap_or_default();
        let scope = RunScope {
            run_id,
            root: &tree,
            variables,
            cancel: &cancel,
            prior: &reusable,
        };

        info!("run {} started ({} reusable outputs)", run_id, reusable.len());
        let started_at = Utc::now();
        let mut frame = Frame::default();
        let root = self.run_node(&scope, &tree, NodePath::root(), &mut frame).await;

        let report = RunReport {
            run_id,
            status: RunStatus::from(root.status()),
            root,
            started_at,
            finished_at: Utc::now(),
        };

        match report.status {
            RunStatus::Succeeded => info!("run {} succeeded", run_id),
            RunStatus::Failed => warn!(
                "run {} failed at {} node(s)",
                run_id,
                report.failures().len()
            ),
            RunStatus::Cancelled => {
                warn!("run {} cancelled", run_id);
                return Err(RunError::Cancelled {
                    report: Box::new(report),
                });
            }
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn run_node<'a>(
        &'a self,
        scope: &'a RunScope<'a>,
        node: &'a WorkflowNode,
        path: NodePath,
        frame: &'a mut Frame,
    ) -> BoxFuture<'a, WorkflowNode> {
        async move {
            if scope.cancel.is_cancelled() {
                return self.settle(scope, node, &path, NodeStatus::Cancelled, frame);
            }

            match &node.step {
                StepKind::Agent {
                    agent,
                    inputs,
                    timeout_ms,
                } => {
                    self.run_agent(scope, node, agent, inputs, *timeout_ms, path, frame)
                        .await
                }
                StepKind::Sequence { children } => {
                    self.run_sequence(scope, node, children, path, frame).await
                }
                StepKind::Branch {
                    condition,
                    cases,
                    default,
                } => {
                    self.run_branch(scope, node, condition, cases, default.as_deref(), path, frame)
                        .await
                }
                StepKind::Loop { source, body, .. } => {
                    self.run_loop(scope, node, source, body, path, frame).await
                }
            }
        }
        .boxed()
    }

    // -----------------------------------------------------------------------
    // Agent steps
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run_agent(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        agent: &str,
        inputs: &InputSpec,
        timeout_ms: Option<u64>,
        path: NodePath,
        frame: &mut Frame,
    ) -> WorkflowNode {
        let started_at = self.start(scope, node, &path, frame);

        // Inputs that need nothing under this node bind before any nested step runs.
        let preflight = InputBinder::new(scope.root, scope.variables, &frame.store, &frame.loops)
            .preflight(inputs, &path);

        let mut halt = preflight.as_ref().err().map(|_| NodeStatus::Skipped);
        let mut failure: Option<BindingError> = preflight.err();
        let mut bound = BoundInputs::with_capacity(inputs.len());
        let mut built_inputs = InputSpec::with_capacity(inputs.len());

        for (position, (name, source)) in inputs.iter().enumerate() {
            let InputSource::Step { node: child } = source else {
                built_inputs.insert(name.clone(), source.clone());
                if halt.is_some() {
                    continue;
                }
                let value = InputBinder::new(scope.root, scope.variables, &frame.store, &frame.loops)
                    .evaluate(name, source);
                match value {
                    Ok(value) => {
                        bound.insert(name.clone(), value);
                    }
                    Err(err) => {
                        failure = Some(err);
                        halt = Some(NodeStatus::Skipped);
                    }
                }
                continue;
            };

            let child_path = path.child(Field::Input, position);
            if let Some(status) = halt {
                let settled = self.settle(scope, child, &child_path, status, frame);
                built_inputs.insert(name.clone(), InputSource::step(settled));
                continue;
            }

            let done = self.run_node(scope, child, child_path.clone(), frame).await;
            match done.status() {
                Some(NodeStatus::Succeeded) => {
                    bound.insert(name.clone(), done.output().cloned().unwrap_or(Value::Null));
                }
                Some(NodeStatus::Cancelled) => halt = Some(NodeStatus::Cancelled),
                status => {
                    failure = Some(BindingError::NestedStep {
                        input: name.clone(),
                        path: child_path.to_string(),
                        status: status.unwrap_or(NodeStatus::Failed),
                    });
                    halt = Some(NodeStatus::Skipped);
                }
            }
            built_inputs.insert(name.clone(), InputSource::step(done));
        }

        let built = node.rebuild(StepKind::Agent {
            agent: agent.to_owned(),
            inputs: built_inputs,
            timeout_ms,
        });

        if let Some(err) = failure {
            return self.finish(scope, built, &path, NodeOutcome::failed(err.into(), started_at), None, frame);
        }
        if halt == Some(NodeStatus::Cancelled) || scope.cancel.is_cancelled() {
            return self.finish(scope, built, &path, NodeOutcome::cancelled(started_at), None, frame);
        }

        if let Some(output) = reused_output(scope, node, &path) {
            debug!(path = %path, "reusing prior output");
            let outcome = NodeOutcome::succeeded(output, started_at).reused();
            return self.finish(scope, built, &path, outcome, None, frame);
        }

        let timeout_ms = timeout_ms.or(self.config.default_step_timeout_ms);
        let (invocation, attempts) = self
            .invoke_with_retry(scope, node, agent, &bound, &path, timeout_ms)
            .await;

        let outcome = match invocation {
            Invocation::Done(output) => NodeOutcome::succeeded(output, started_at),
            Invocation::Failed(err) => NodeOutcome::failed(err, started_at),
            Invocation::Cancelled => NodeOutcome::cancelled(started_at),
        };
        self.finish(scope, built, &path, outcome.with_attempts(attempts), None, frame)
    }

    /// Invoke the agent, retrying retryable failures with exponential back-off.
    /// Returns how the invocation ended and the number of attempts made.
    async fn invoke_with_retry(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        agent: &str,
        inputs: &BoundInputs,
        path: &NodePath,
        timeout_ms: Option<u64>,
    ) -> (Invocation, u32) {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let ctx = InvocationContext {
                run_id: scope.run_id,
                node_id: node.id.clone().unwrap_or_default(),
                path: path.to_string(),
                label: node.label.clone(),
                attempt,
            };

            let call = self.agent.invoke(agent, inputs, &ctx);
            let bounded = async {
                match timeout_ms {
                    Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call).await,
                    None => Ok(call.await),
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return (Invocation::Cancelled, attempt),
                outcome = bounded => outcome,
            };

            let err = match outcome {
                Ok(Ok(output)) => return (Invocation::Done(output), attempt),
                Ok(Err(err)) => err,
                Err(_elapsed) => {
                    let timeout_ms = timeout_ms.unwrap_or_default();
                    warn!("step '{}' at {} timed out after {}ms", agent, path, timeout_ms);
                    return (Invocation::Failed(NodeError::Timeout { timeout_ms }), attempt);
                }
            };

            if !err.is_retryable() || attempt > self.config.max_retries {
                warn!("step '{}' at {} failed after {} attempt(s): {}", agent, path, attempt, err);
                let failure = NodeError::Executor {
                    message: err.message().to_owned(),
                    retryable: err.is_retryable(),
                    attempts: attempt,
                };
                return (Invocation::Failed(failure), attempt);
            }

            let delay = self
                .config
                .retry_base_delay()
                .saturating_mul(2u32.saturating_pow(attempt - 1));

            warn!(
                "step '{}' at {} retryable error (attempt {}/{}), retrying in {:?}: {}",
                agent,
                path,
                attempt,
                self.config.max_retries + 1,
                delay,
                err.message()
            );

            tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return (Invocation::Cancelled, attempt),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sequences
    // -----------------------------------------------------------------------

    async fn run_sequence(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        children: &[WorkflowNode],
        path: NodePath,
        frame: &mut Frame,
    ) -> WorkflowNode {
        let started_at = self.start(scope, node, &path, frame);

        let mut done = Vec::with_capacity(children.len());
        let mut halt: Option<NodeStatus> = None;
        let mut failed_child: Option<NodePath> = None;

        for (index, child) in children.iter().enumerate() {
            let child_path = path.child(Field::Input, index);
            if let Some(status) = halt {
                done.push(self.settle(scope, child, &child_path, status, frame));
                continue;
            }

            let finished = self.run_node(scope, child, child_path.clone(), frame).await;
            match finished.status() {
                Some(NodeStatus::Succeeded) => {}
                Some(NodeStatus::Cancelled) => halt = Some(NodeStatus::Cancelled),
                _ => {
                    halt = Some(NodeStatus::Skipped);
                    failed_child = Some(child_path);
                }
            }
            done.push(finished);
        }

        let outcome = match (failed_child, halt) {
            (Some(child), _) => NodeOutcome::failed(
                NodeError::ChildFailed {
                    path: child.to_string(),
                },
                started_at,
            ),
            (None, Some(NodeStatus::Cancelled)) => NodeOutcome::cancelled(started_at),
            _ => NodeOutcome::succeeded(collect_outputs(&done), started_at),
        };

        let built = node.rebuild(StepKind::Sequence { children: done });
        self.finish(scope, built, &path, outcome, None, frame)
    }

    // -----------------------------------------------------------------------
    // Branches
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run_branch(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        condition: &InputSource,
        cases: &[BranchCase],
        default: Option<&WorkflowNode>,
        path: NodePath,
        frame: &mut Frame,
    ) -> WorkflowNode {
        let started_at = self.start(scope, node, &path, frame);

        let value = InputBinder::new(scope.root, scope.variables, &frame.store, &frame.loops)
            .evaluate("condition", condition);

        let selected = value.as_ref().ok().and_then(|value| {
            cases
                .iter()
                .position(|case| &case.when == value)
                .or(default.map(|_| cases.len()))
        });

        let candidates: Vec<&WorkflowNode> =
            cases.iter().map(|case| &case.node).chain(default).collect();

        let mut done = Vec::with_capacity(candidates.len());
        let mut chosen: Option<(NodePath, Option<NodeStatus>, Option<Value>)> = None;

        for (index, candidate) in candidates.into_iter().enumerate() {
            let child_path = path.child(Field::Input, index);
            if Some(index) == selected {
                let finished = self.run_node(scope, candidate, child_path.clone(), frame).await;
                chosen = Some((child_path, finished.status(), finished.output().cloned()));
                done.push(finished);
            } else {
                done.push(self.settle(scope, candidate, &child_path, NodeStatus::Skipped, frame));
            }
        }

        let outcome = match (value, chosen) {
            (Err(err), _) => NodeOutcome::failed(err.into(), started_at),
            (Ok(value), None) => NodeOutcome::failed(NodeError::NoBranchMatched { value }, started_at),
            (Ok(_), Some((_, Some(NodeStatus::Succeeded), output))) => {
                NodeOutcome::succeeded(output.unwrap_or(Value::Null), started_at)
            }
            (Ok(_), Some((_, Some(NodeStatus::Cancelled), _))) => NodeOutcome::cancelled(started_at),
            (Ok(_), Some((child, _, _))) => NodeOutcome::failed(
                NodeError::ChildFailed {
                    path: child.to_string(),
                },
                started_at,
            ),
        };

        let mut done = done.into_iter();
        let rebuilt_cases = cases
            .iter()
            .zip(done.by_ref())
            .map(|(case, node)| BranchCase {
                when: case.when.clone(),
                node,
            })
            .collect();
        let built = node.rebuild(StepKind::Branch {
            condition: condition.clone(),
            cases: rebuilt_cases,
            default: done.next().map(Box::new),
        });

        self.finish(scope, built, &path, outcome, None, frame)
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    async fn run_loop(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        source: &InputSource,
        body: &WorkflowNode,
        path: NodePath,
        frame: &mut Frame,
    ) -> WorkflowNode {
        let started_at = self.start(scope, node, &path, frame);
        let body_path = path.child(Field::Item, 0);

        let elements = InputBinder::new(scope.root, scope.variables, &frame.store, &frame.loops)
            .elements("source", source);

        let elements = match elements {
            Ok(elements) if !elements.is_empty() => elements,
            result => {
                let settled = self.settle(scope, body, &body_path, NodeStatus::Skipped, frame);
                let built = node.rebuild(StepKind::Loop {
                    source: source.clone(),
                    body: Box::new(settled),
                    instances: Vec::new(),
                });
                let outcome = match result {
                    Err(err) => NodeOutcome::failed(err.into(), started_at),
                    Ok(_) => NodeOutcome::succeeded(Value::Array(Vec::new()), started_at),
                };
                return self.finish(scope, built, &path, outcome, Some(0), frame);
            }
        };

        let total = elements.len();
        let window = self.config.max_loop_concurrency.max(1);
        debug!(path = %path, total, window, "starting loop instances");

        // Every instance starts from the same view of the run. A freed slot
        // goes to the next element as soon as any instance finishes.
        let snapshot = frame.clone();
        let mut pending = elements.into_iter().enumerate();
        let mut running = FuturesUnordered::new();
        for (index, element) in pending.by_ref().take(window) {
            running.push(self.run_instance(scope, body, path.clone(), snapshot.clone(), index, element));
        }

        let mut slots: Vec<Option<WorkflowNode>> = vec![None; total];
        while let Some((index, instance, store)) = running.next().await {
            frame.store.absorb(store, &path);
            slots[index] = Some(instance);
            if let Some((index, element)) = pending.next() {
                running.push(self.run_instance(scope, body, path.clone(), snapshot.clone(), index, element));
            }
        }
        let instances: Vec<WorkflowNode> = slots.into_iter().flatten().collect();

        let failed: Vec<usize> = instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| {
                !matches!(
                    instance.status(),
                    Some(NodeStatus::Succeeded) | Some(NodeStatus::Cancelled)
                )
            })
            .map(|(index, _)| index)
            .collect();

        let outcome = if instances
            .iter()
            .any(|instance| instance.status() == Some(NodeStatus::Cancelled))
        {
            NodeOutcome::cancelled(started_at)
        } else if !failed.is_empty() {
            NodeOutcome::failed(NodeError::InstancesFailed { indices: failed }, started_at)
        } else {
            NodeOutcome::succeeded(collect_outputs(&instances), started_at)
        };

        let built = node.rebuild(StepKind::Loop {
            source: source.clone(),
            body: Box::new(body.clone()),
            instances,
        });
        self.finish(scope, built, &path, outcome, Some(total), frame)
    }

    /// Run one loop iteration on its own copy of the run state, returning its
    /// index, the instance's result tree and everything it recorded.
    fn run_instance<'a>(
        &'a self,
        scope: &'a RunScope<'a>,
        body: &'a WorkflowNode,
        loop_path: NodePath,
        mut frame: Frame,
        index: usize,
        element: Value,
    ) -> BoxFuture<'a, (usize, WorkflowNode, ResultStore)> {
        async move {
            let instance = instantiate(body, index);
            let path = loop_path.child(Field::Item, index);
            frame.loops.push(LoopFrame {
                loop_path,
                index,
                element,
            });
            let done = self.run_node(scope, &instance, path, &mut frame).await;
            (index, done, frame.store)
        }
        .boxed()
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn start(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        path: &NodePath,
        frame: &mut Frame,
    ) -> DateTime<Utc> {
        frame.store.mark_running(path);
        self.emit(scope, node, path, NodeStatus::Running);
        Utc::now()
    }

    fn finish(
        &self,
        scope: &RunScope<'_>,
        mut built: WorkflowNode,
        path: &NodePath,
        outcome: NodeOutcome,
        instances: Option<usize>,
        frame: &mut Frame,
    ) -> WorkflowNode {
        if let Some(err) = outcome.error.as_ref().filter(|err| !err.is_propagated()) {
            warn!(
                "{} node at {} failed ({}): {}",
                built.kind_name(),
                path,
                err.kind(),
                err
            );
        }
        frame.store.record(path.clone(), &outcome, instances);
        self.emit(scope, &built, path, outcome.status);
        built.result = Some(outcome);
        built
    }

    /// Mark a subtree that never started with `status` throughout.
    fn settle(
        &self,
        scope: &RunScope<'_>,
        node: &WorkflowNode,
        path: &NodePath,
        status: NodeStatus,
        frame: &mut Frame,
    ) -> WorkflowNode {
        let mut settled = node.clone();
        self.settle_in_place(scope, &mut settled, path, status, frame);
        settled
    }

    fn settle_in_place(
        &self,
        scope: &RunScope<'_>,
        node: &mut WorkflowNode,
        path: &NodePath,
        status: NodeStatus,
        frame: &mut Frame,
    ) {
        let outcome = NodeOutcome::untouched(status);
        frame.store.record(path.clone(), &outcome, None);
        self.emit(scope, node, path, status);
        node.result = Some(outcome);

        for (segment, child) in node.children_mut() {
            self.settle_in_place(scope, child, &path.join(segment), status, frame);
        }
    }

    fn emit(&self, scope: &RunScope<'_>, node: &WorkflowNode, path: &NodePath, status: NodeStatus) {
        debug!(path = %path, status = %status, "node transition");
        if let Some(progress) = &self.progress {
            let _ = progress.send(NodeEvent {
                run_id: scope.run_id,
                node_id: node.id.clone().unwrap_or_default(),
                path: path.clone(),
                label: node.label.clone(),
                status,
                at: Utc::now(),
            });
        }
    }
}

/// Run `tree` once against `agent` with the default configuration.
///
/// # Errors
/// Same as [`FlowExecutor::execute`].
pub async fn execute(
    tree: WorkflowNode,
    variables: &BoundVariables,
    agent: Arc<dyn AgentExecutor>,
    cancel: CancellationToken,
) -> Result<RunReport, RunError> {
    FlowExecutor::new(agent, ExecutorConfig::default())
        .execute(tree, variables, cancel)
        .await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drop any results and loop instances from an earlier run.
fn as_definition(mut tree: WorkflowNode) -> WorkflowNode {
    strip_results(&mut tree);
    tree
}

fn strip_results(node: &mut WorkflowNode) {
    node.result = None;
    if let StepKind::Loop { instances, .. } = &mut node.step {
        instances.clear();
    }
    for (_, child) in node.children_mut() {
        strip_results(child);
    }
}

/// A fresh copy of a loop body for iteration `index`, with IDs made unique.
fn instantiate(body: &WorkflowNode, index: usize) -> WorkflowNode {
    let mut instance = body.clone();
    suffix_ids(&mut instance, index);
    instance
}

fn suffix_ids(node: &mut WorkflowNode, index: usize) {
    if let Some(id) = node.id.as_mut() {
        id.push('@');
        id.push_str(&index.to_string());
    }
    for (_, child) in node.children_mut() {
        suffix_ids(child, index);
    }
}

fn collect_outputs(nodes: &[WorkflowNode]) -> Value {
    Value::Array(
        nodes
            .iter()
            .map(|node| node.output().cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

/// Succeeded agent outputs of a prior result tree, keyed by path.
fn reusable_outputs(prior: &WorkflowNode) -> HashMap<NodePath, (String, Value)> {
    let mut reusable = HashMap::new();
    prior.walk(&mut |path, node| {
        let StepKind::Agent { .. } = node.step else {
            return;
        };
        let Some(id) = node.id.as_ref() else {
            return;
        };
        if let Some(outcome) = node.result.as_ref().filter(|r| r.status == NodeStatus::Succeeded) {
            let output = outcome.output.clone().unwrap_or(Value::Null);
            reusable.insert(path.clone(), (id.clone(), output));
        }
    });
    reusable
}

fn reused_output(scope: &RunScope<'_>, node: &WorkflowNode, path: &NodePath) -> Option<Value> {
    let (prior_id, output) = scope.prior.get(path)?;
    (node.id.as_deref() == Some(prior_id.as_str())).then(|| output.clone())
}
