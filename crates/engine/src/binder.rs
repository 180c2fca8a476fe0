//! Input binding: turns a step's declared inputs into concrete values.
//!
//! The binder is a pure function of the node being bound, the results
//! produced so far in the run, the bound variables and the enclosing loop
//! iterations. It performs no I/O and never invokes an agent.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{BindingError, PathError};
use crate::models::{InputSource, InputSpec, StepKind, WorkflowNode};
use crate::path::{describe_miss, Field, NodePath, PathExpr};
use crate::result::{NodeOutcome, NodeStatus};
use crate::variables::{describe_value, BoundVariables};

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

/// What the run knows about one node so far.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
    pub status: NodeStatus,
    pub output: Option<Value>,
    /// Number of iterations, recorded for loops once they finish.
    pub instances: Option<usize>,
}

/// Results of the current run keyed by concrete node path.
///
/// Only nodes that have started appear here; anything absent has not been
/// reached yet.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    entries: HashMap<NodePath, StoreEntry>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_running(&mut self, path: &NodePath) {
        self.entries.insert(
            path.clone(),
            StoreEntry {
                status: NodeStatus::Running,
                output: None,
                instances: None,
            },
        );
    }

    pub fn record(&mut self, path: NodePath, outcome: &NodeOutcome, instances: Option<usize>) {
        self.entries.insert(
            path,
            StoreEntry {
                status: outcome.status,
                output: outcome.output.clone(),
                instances,
            },
        );
    }

    pub fn get(&self, path: &NodePath) -> Option<&StoreEntry> {
        self.entries.get(path)
    }

    /// Take over the entries of `other` that live under `prefix`.
    pub fn absorb(&mut self, other: ResultStore, prefix: &NodePath) {
        self.entries
            .extend(other.entries.into_iter().filter(|(path, _)| path.starts_with(prefix)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One enclosing loop iteration.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    /// Concrete path of the loop node.
    pub loop_path: NodePath,
    pub index: usize,
    pub element: Value,
}

// ---------------------------------------------------------------------------
// InputBinder
// ---------------------------------------------------------------------------

/// Binds inputs against the run state visible from one node.
pub struct InputBinder<'a> {
    root: &'a WorkflowNode,
    variables: &'a BoundVariables,
    results: &'a ResultStore,
    loops: &'a [LoopFrame],
}

impl<'a> InputBinder<'a> {
    pub fn new(
        root: &'a WorkflowNode,
        variables: &'a BoundVariables,
        results: &'a ResultStore,
        loops: &'a [LoopFrame],
    ) -> Self {
        Self {
            root,
            variables,
            results,
            loops,
        }
    }

    /// Bind every input that needs nothing at or under `own`, discarding the
    /// values. Lets a step fail before any of its nested steps run; nested
    /// steps and references into them bind later, in declaration order.
    ///
    /// # Errors
    /// The first [`BindingError`] in declaration order.
    pub fn preflight(&self, inputs: &InputSpec, own: &NodePath) -> Result<(), BindingError> {
        inputs
            .iter()
            .filter(|(_, source)| !self.reaches_into(source, own))
            .try_for_each(|(name, source)| self.evaluate(name, source).map(drop))
    }

    fn reaches_into(&self, source: &InputSource, own: &NodePath) -> bool {
        match source {
            InputSource::Step { .. } => true,
            InputSource::Path { path } => PathExpr::parse(path)
                .and_then(|expr| expr.to_node_path())
                .is_ok_and(|target| self.rebase(target).starts_with(own)),
            _ => false,
        }
    }

    /// Evaluate a single non-step source, e.g. a branch condition or loop source.
    ///
    /// # Errors
    /// [`BindingError`] describing why `source` has no value; nested steps
    /// are rejected with [`BindingError::StepNotAllowed`].
    pub fn evaluate(&self, input: &str, source: &InputSource) -> Result<Value, BindingError> {
        match source {
            InputSource::Literal { value } => Ok(value.clone()),
            InputSource::Variable { name } => self.variables.lookup(input, name),
            InputSource::Path { path } => self.resolve_reference(input, path),
            InputSource::Element => self
                .loops
                .last()
                .map(|frame| frame.element.clone())
                .ok_or_else(|| BindingError::NoLoopElement {
                    input: input.to_owned(),
                }),
            InputSource::Step { .. } => Err(BindingError::StepNotAllowed {
                input: input.to_owned(),
            }),
        }
    }

    /// Evaluate a loop source and require an array.
    ///
    /// # Errors
    /// As [`InputBinder::evaluate`], plus [`BindingError::NotIterable`].
    pub fn elements(&self, input: &str, source: &InputSource) -> Result<Vec<Value>, BindingError> {
        match self.evaluate(input, source)? {
            Value::Array(items) => Ok(items),
            other => Err(BindingError::NotIterable {
                input: input.to_owned(),
                found: describe_value(&other),
            }),
        }
    }

    /// Point references into an enclosing loop's body at the current iteration.
    ///
    /// Inside iteration `k` of the loop at `L`, `L.item[j]...` means
    /// `L.item[k]...`: an iteration only ever sees its own nodes.
    pub fn rebase(&self, path: NodePath) -> NodePath {
        self.loops.iter().fold(path, |path, frame| {
            let depth = frame.loop_path.len();
            let through_loop = path.starts_with(&frame.loop_path)
                && path
                    .segments()
                    .get(depth)
                    .is_some_and(|segment| segment.field == Field::Item);
            if through_loop {
                path.with_index_at(depth, frame.index)
            } else {
                path
            }
        })
    }

    fn resolve_reference(&self, input: &str, raw: &str) -> Result<Value, BindingError> {
        let as_binding = |error: PathError| BindingError::Path {
            input: input.to_owned(),
            error,
        };

        let expr = PathExpr::parse(raw).map_err(as_binding)?;
        let path = self.rebase(expr.to_node_path().map_err(as_binding)?);
        self.locate(&expr, &path).map_err(as_binding)?;

        match self.results.get(&path) {
            Some(entry) if entry.status == NodeStatus::Succeeded => {
                Ok(entry.output.clone().unwrap_or(Value::Null))
            }
            Some(entry) if entry.status.is_terminal() => Err(BindingError::Unsuccessful {
                input: input.to_owned(),
                path: path.to_string(),
                status: entry.status,
            }),
            _ => Err(BindingError::NotExecuted {
                input: input.to_owned(),
                path: path.to_string(),
            }),
        }
    }

    /// Check that `path` names a node of the definition tree. Any loop
    /// iteration index maps onto the loop body, bounded by the iteration
    /// count once the loop has finished. A loop that ran no iterations still
    /// shows its skipped body at `item[0]`, as its result tree does.
    fn locate(&self, expr: &PathExpr, path: &NodePath) -> Result<(), PathError> {
        let mut current = self.root;
        let mut walked = NodePath::root();

        for (position, segment) in path.segments().iter().enumerate() {
            let next = match (&current.step, segment.field) {
                (StepKind::Loop { body, .. }, Field::Item) => {
                    let finished = self.results.get(&walked).and_then(|entry| entry.instances);
                    match finished {
                        Some(count) if segment.index >= count.max(1) => {
                            return Err(expr.not_found(
                                position,
                                format!("loop ran {count} iteration(s)"),
                            ))
                        }
                        _ => Some(body.as_ref()),
                    }
                }
                _ => current.child(segment.field, segment.index),
            };

            current = next.ok_or_else(|| expr.not_found(position, describe_miss(current, *segment)))?;
            walked = walked.join(*segment);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{FlowInputVariable, VarType};
    use chrono::Utc;
    use serde_json::json;

    // $                      sequence
    // $.input[0]             agent "fetch"
    // $.input[1]             loop over var "items"
    // $.input[1].item[0]     sequence
    // $.input[1].item[0].input[0]   agent "clean"
    // $.input[1].item[0].input[1]   agent "score"
    // $.input[2]             agent "report"
    fn tree() -> WorkflowNode {
        WorkflowNode::sequence(vec![
            WorkflowNode::agent("fetch"),
            WorkflowNode::loop_over(
                InputSource::var("items"),
                WorkflowNode::sequence(vec![WorkflowNode::agent("clean"), WorkflowNode::agent("score")]),
            ),
            WorkflowNode::agent("report"),
        ])
    }

    fn variables() -> BoundVariables {
        BoundVariables::new(
            &[
                FlowInputVariable::new("q", VarType::Text).required(),
                FlowInputVariable::new("items", VarType::Text),
            ],
            [("q".to_owned(), json!("hello"))],
        )
    }

    fn path(expr: &str) -> NodePath {
        expr.parse().unwrap()
    }

    fn succeeded(store: &mut ResultStore, expr: &str, output: Value) {
        store.record(path(expr), &NodeOutcome::succeeded(output, Utc::now()), None);
    }

    #[test]
    fn evaluates_literals_variables_and_paths() {
        let tree = tree();
        let vars = variables();
        let mut store = ResultStore::new();
        succeeded(&mut store, "$.input[0]", json!("HELLO WORLD"));

        let binder = InputBinder::new(&tree, &vars, &store, &[]);
        assert_eq!(binder.evaluate("text", &InputSource::path("$.input[0]")).unwrap(), json!("HELLO WORLD"));
        assert_eq!(binder.evaluate("query", &InputSource::var("q")).unwrap(), json!("hello"));
        assert_eq!(binder.evaluate("style", &InputSource::literal("brief")).unwrap(), json!("brief"));
    }

    #[test]
    fn later_sibling_is_not_yet_executed() {
        let tree = tree();
        let vars = variables();
        let store = ResultStore::new();
        let binder = InputBinder::new(&tree, &vars, &store, &[]);

        assert!(matches!(
            binder.evaluate("x", &InputSource::path("$.input[2]")),
            Err(BindingError::NotExecuted { path, .. }) if path == "$.input[2]"
        ));
    }

    #[test]
    fn nonexistent_node_is_a_path_error_with_segment() {
        let tree = tree();
        let vars = variables();
        let store = ResultStore::new();
        let binder = InputBinder::new(&tree, &vars, &store, &[]);

        match binder.evaluate("x", &InputSource::path("$.input[1].item[0].input[5]")) {
            Err(BindingError::Path { error: PathError::NotFound { segment, index, .. }, .. }) => {
                assert_eq!(segment, "input[5]");
                assert_eq!(index, 2);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(matches!(
            binder.evaluate("x", &InputSource::path("input[0]")),
            Err(BindingError::Path { error: PathError::Malformed { .. }, .. })
        ));
    }

    #[test]
    fn failed_reference_reports_its_status() {
        let tree = tree();
        let vars = variables();
        let mut store = ResultStore::new();
        store.record(path("$.input[0]"), &NodeOutcome::untouched(NodeStatus::Skipped), None);

        let binder = InputBinder::new(&tree, &vars, &store, &[]);
        assert!(matches!(
            binder.evaluate("x", &InputSource::path("$.input[0]")),
            Err(BindingError::Unsuccessful { status: NodeStatus::Skipped, .. })
        ));
    }

    #[test]
    fn running_ancestor_is_not_yet_executed() {
        let tree = tree();
        let vars = variables();
        let mut store = ResultStore::new();
        store.mark_running(&NodePath::root());

        let binder = InputBinder::new(&tree, &vars, &store, &[]);
        assert!(matches!(
            binder.evaluate("x", &InputSource::path("$")),
            Err(BindingError::NotExecuted { .. })
        ));
    }

    #[test]
    fn references_inside_a_loop_are_rebased_onto_the_current_iteration() {
        let tree = tree();
        let vars = variables();
        let mut store = ResultStore::new();
        succeeded(&mut store, "$.input[1].item[2].input[0]", json!("cleaned c"));

        let frames = [LoopFrame {
            loop_path: path("$.input[1]"),
            index: 2,
            element: json!("c"),
        }];
        let binder = InputBinder::new(&tree, &vars, &store, &frames);

        assert_eq!(
            binder.evaluate("x", &InputSource::path("$.input[1].item[0].input[0]")).unwrap(),
            json!("cleaned c")
        );
        assert_eq!(binder.evaluate("x", &InputSource::Element).unwrap(), json!("c"));
        assert_eq!(binder.rebase(path("$.input[0]")), path("$.input[0]"));
    }

    #[test]
    fn finished_loop_bounds_iteration_indices() {
        let tree = tree();
        let vars = variables();
        let mut store = ResultStore::new();
        succeeded(&mut store, "$.input[1].item[1]", json!(["b"]));
        store.record(
            path("$.input[1]"),
            &NodeOutcome::succeeded(json!([["a"], ["b"]]), Utc::now()),
            Some(2),
        );

        let binder = InputBinder::new(&tree, &vars, &store, &[]);
        assert_eq!(
            binder.evaluate("x", &InputSource::path("$.input[1].item[1]")).unwrap(),
            json!(["b"])
        );
        assert!(matches!(
            binder.evaluate("x", &InputSource::path("$.input[1].item[2]")),
            Err(BindingError::Path { error: PathError::NotFound { index: 1, .. }, .. })
        ));
    }

    #[test]
    fn loop_without_iterations_exposes_only_its_skipped_body() {
        let tree = tree();
        let vars = variables();
        let mut store = ResultStore::new();
        store.record(
            path("$.input[1]"),
            &NodeOutcome::succeeded(json!([]), Utc::now()),
            Some(0),
        );
        store.record(path("$.input[1].item[0]"), &NodeOutcome::untouched(NodeStatus::Skipped), None);

        let binder = InputBinder::new(&tree, &vars, &store, &[]);
        assert!(matches!(
            binder.evaluate("x", &InputSource::path("$.input[1].item[0]")),
            Err(BindingError::Unsuccessful { status: NodeStatus::Skipped, .. })
        ));
        assert!(matches!(
            binder.evaluate("x", &InputSource::path("$.input[1].item[1]")),
            Err(BindingError::Path { error: PathError::NotFound { index: 1, .. }, .. })
        ));
    }

    #[test]
    fn element_outside_a_loop_and_nested_step_in_condition_fail() {
        let tree = tree();
        let vars = variables();
        let store = ResultStore::new();
        let binder = InputBinder::new(&tree, &vars, &store, &[]);

        assert!(matches!(
            binder.evaluate("x", &InputSource::Element),
            Err(BindingError::NoLoopElement { .. })
        ));
        assert!(matches!(
            binder.evaluate("condition", &InputSource::step(WorkflowNode::agent("a"))),
            Err(BindingError::StepNotAllowed { .. })
        ));
    }

    #[test]
    fn loop_source_must_be_an_array() {
        let tree = tree();
        let vars = variables();
        let store = ResultStore::new();
        let binder = InputBinder::new(&tree, &vars, &store, &[]);

        assert_eq!(
            binder.elements("source", &InputSource::literal(json!([1, 2]))).unwrap(),
            vec![json!(1), json!(2)]
        );
        assert!(matches!(
            binder.elements("source", &InputSource::var("q")),
            Err(BindingError::NotIterable { found, .. }) if found == "string 'hello'"
        ));
    }

    #[test]
    fn preflight_skips_nested_steps_but_catches_missing_variables() {
        let tree = tree();
        let vars = BoundVariables::new(&[FlowInputVariable::new("q", VarType::Text).required()], []);
        let store = ResultStore::new();
        let binder = InputBinder::new(&tree, &vars, &store, &[]);

        let inputs: InputSpec = [
            ("inner".to_owned(), InputSource::step(WorkflowNode::agent("inner"))),
            ("query".to_owned(), InputSource::var("q")),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            binder.preflight(&inputs, &path("$.input[2]")).unwrap_err(),
            BindingError::MissingVariable { input: "query".into(), variable: "q".into() }
        );
    }

    #[test]
    fn preflight_leaves_references_into_the_own_subtree_for_later() {
        let tree = tree();
        let vars = variables();
        let store = ResultStore::new();
        let binder = InputBinder::new(&tree, &vars, &store, &[]);

        let own: InputSpec = [("copy".to_owned(), InputSource::path("$.input[2].input[0]"))]
            .into_iter()
            .collect();
        assert!(binder.preflight(&own, &path("$.input[2]")).is_ok());

        let sibling: InputSpec = [("next".to_owned(), InputSource::path("$.input[0]"))]
            .into_iter()
            .collect();
        assert!(matches!(
            binder.preflight(&sibling, &path("$.input[2]")),
            Err(BindingError::NotExecuted { .. })
        ));
    }
}
