//! Breadcrumb labels for agent nodes.
//!
//! Only agent nodes contribute to a lineage; sequences, branches and loops are
//! transparent. A nested agent therefore reads `outer > inner`.
//!
//! An agent's segment is its `name` when set, else its agent label. Any
//! `label` already on an agent node is overwritten, so `name` is the only
//! authored override.

use crate::models::WorkflowNode;

pub const LABEL_SEPARATOR: &str = " > ";

/// Set `label` on every agent node to the chain of agent step labels from the
/// root down to and including itself. Container labels are left as authored.
///
/// Idempotent, and only nodes below an edit change label when re-run.
pub fn derive_names(mut tree: WorkflowNode) -> WorkflowNode {
    let mut lineage = Vec::new();
    name_subtree(&mut tree, &mut lineage);
    tree
}

fn name_subtree(node: &mut WorkflowNode, lineage: &mut Vec<String>) {
    let pushed = match node.step_label() {
        Some(step) => {
            lineage.push(step.to_owned());
            node.label = Some(lineage.join(LABEL_SEPARATOR));
            true
        }
        None => false,
    };

    for (_, child) in node.children_mut() {
        name_subtree(child, lineage);
    }

    if pushed {
        lineage.pop();
    }
}
