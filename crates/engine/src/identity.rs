//! Identity assignment. Run this before naming, persisting or executing a tree.
//!
//! Rules enforced:
//! 1. Existing node IDs must be unique within the tree.
//! 2. Every node without an ID gets a fresh random one.
//! 3. An ID, once present, is never replaced.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::error::TreeError;
use crate::models::WorkflowNode;
use crate::path::NodePath;

/// A fresh, fixed-length (32 hex chars) node identifier.
pub fn new_node_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn has_id(node: &WorkflowNode) -> bool {
    node.id.as_deref().is_some_and(|id| !id.is_empty())
}

/// Give every node lacking an ID a fresh one. Idempotent.
///
/// # Errors
/// [`TreeError::DuplicateNodeId`] if two nodes already share an ID; the tree
/// is returned to nobody in that case since path addressing would be ambiguous.
pub fn assign_identities(mut tree: WorkflowNode) -> Result<WorkflowNode, TreeError> {
    check_unique(&tree, false)?;
    fill_missing(&mut tree);
    Ok(tree)
}

/// Check that every node has an ID and that all IDs are distinct.
///
/// # Errors
/// - [`TreeError::MissingNodeId`] for the first node without an ID.
/// - [`TreeError::DuplicateNodeId`] if two nodes share an ID.
pub fn validate_identities(tree: &WorkflowNode) -> Result<(), TreeError> {
    check_unique(tree, true)
}

fn check_unique(tree: &WorkflowNode, require_all: bool) -> Result<(), TreeError> {
    let mut seen: HashMap<&str, NodePath> = HashMap::new();
    let mut queue: VecDeque<(NodePath, &WorkflowNode)> = VecDeque::from([(NodePath::root(), tree)]);

    while let Some((path, node)) = queue.pop_front() {
        match node.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                if let Some(first) = seen.get(id) {
                    return Err(TreeError::DuplicateNodeId {
                        id: id.to_owned(),
                        first: first.to_string(),
                        second: path.to_string(),
                    });
                }
                seen.insert(id, path.clone());
            }
            None if require_all => {
                return Err(TreeError::MissingNodeId {
                    path: path.to_string(),
                })
            }
            None => {}
        }

        for (segment, child) in node.children() {
            queue.push_back((path.join(segment), child));
        }
    }

    Ok(())
}

fn fill_missing(node: &mut WorkflowNode) {
    if !has_id(node) {
        node.id = Some(new_node_id());
    }
    for (_, child) in node.children_mut() {
        fill_missing(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchCase, InputSource};
    use serde_json::json;
    use std::collections::HashSet;

    fn collect_ids(tree: &WorkflowNode) -> Vec<String> {
        let mut ids = Vec::new();
        tree.walk(&mut |_, node| ids.push(node.id.clone().unwrap_or_default()));
        ids
    }

    fn unidentified_tree() -> WorkflowNode {
        WorkflowNode::sequence(vec![
            WorkflowNode::agent("fetch")
                .with_input("seed", InputSource::step(WorkflowNode::agent("seed"))),
            WorkflowNode::branch(
                InputSource::var("mode"),
                vec![BranchCase { when: json!("fast"), node: WorkflowNode::agent("fast") }],
                Some(WorkflowNode::agent("slow")),
            ),
            WorkflowNode::loop_over(InputSource::var("items"), WorkflowNode::agent("each")),
        ])
    }

    #[test]
    fn every_node_gets_a_distinct_non_empty_id() {
        let tree = assign_identities(unidentified_tree()).expect("no duplicates");
        let ids = collect_ids(&tree);

        assert_eq!(ids.len(), 8);
        assert!(ids.iter().all(|id| id.len() == 32));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
        assert!(validate_identities(&tree).is_ok());
    }

    #[test]
    fn assignment_is_idempotent() {
        let once = assign_identities(unidentified_tree()).unwrap();
        let twice = assign_identities(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn existing_ids_are_kept() {
        let tree = WorkflowNode::sequence(vec![
            WorkflowNode::agent("a").with_id("keep-me"),
            WorkflowNode::agent("b"),
        ]);
        let tree = assign_identities(tree).unwrap();
        let ids = collect_ids(&tree);
        assert_eq!(ids[1], "keep-me");
        assert_ne!(ids[2], "keep-me");
    }

    #[test]
    fn empty_id_counts_as_missing() {
        let tree = assign_identities(WorkflowNode::agent("a").with_id("")).unwrap();
        assert_eq!(tree.id.as_deref().map(str::len), Some(32));
    }

    #[test]
    fn duplicate_ids_are_rejected_with_both_paths() {
        let tree = WorkflowNode::sequence(vec![
            WorkflowNode::agent("a").with_id("dup"),
            WorkflowNode::agent("b").with_id("dup"),
        ]);
        assert!(matches!(
            assign_identities(tree),
            Err(TreeError::DuplicateNodeId { id, first, second })
                if id == "dup" && first == "$.input[0]" && second == "$.input[1]"
        ));
    }

    #[test]
    fn validation_requires_every_id() {
        let tree = WorkflowNode::sequence(vec![WorkflowNode::agent("a")]).with_id("root");
        assert!(matches!(
            validate_identities(&tree),
            Err(TreeError::MissingNodeId { path }) if path == "$.input[0]"
        ));
    }
}
