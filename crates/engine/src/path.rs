//! Path expressions: textual addresses of nodes in a workflow tree.
//!
//! Syntax: the root marker `$`, then dot-separated field names, each with an
//! optional bracketed index appended: `$.input[2].item[0].input[1]`. There are
//! no wildcards or slices.
//!
//! Resolution is a left-to-right walk. Failures name the exact segment that
//! did not resolve, so a bad reference deep inside a nested flow can be
//! located without guesswork.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PathError;
use crate::models::{StepKind, WorkflowNode};

const ROOT: &str = "$";

// ---------------------------------------------------------------------------
// Concrete paths
// ---------------------------------------------------------------------------

/// Traversable attribute of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Agent inputs, sequence children, branch candidates.
    Input,
    /// Loop body (definition trees) or loop instances (result trees).
    Item,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Input => "input",
            Field::Item => "item",
        }
    }

    fn from_name(name: &str) -> Option<Field> {
        match name {
            "input" => Some(Field::Input),
            "item" => Some(Field::Item),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `field[index]` step of a [`NodePath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub field: Field,
    pub index: usize,
}

impl Segment {
    pub fn input(index: usize) -> Self {
        Self { field: Field::Input, index }
    }

    pub fn item(index: usize) -> Self {
        Self { field: Field::Item, index }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.field, self.index)
    }
}

/// The validated position of a node: a sequence of segments below the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<Segment>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment);
        Self(segments)
    }

    pub fn child(&self, field: Field, index: usize) -> Self {
        self.join(Segment { field, index })
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Same path with the index of the segment at `position` replaced.
    pub fn with_index_at(mut self, position: usize, index: usize) -> Self {
        if let Some(segment) = self.0.get_mut(position) {
            segment.index = index;
        }
        self
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROOT)?;
        for segment in &self.0 {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathExpr::parse(s)?.to_node_path()
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Parsed expressions
// ---------------------------------------------------------------------------

/// A syntactically valid segment whose field name has not been checked yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    pub field: String,
    pub index: Option<usize>,
}

impl fmt::Display for RawSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.field, index),
            None => f.write_str(&self.field),
        }
    }
}

/// A well-formed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    segments: Vec<RawSegment>,
}

impl PathExpr {
    /// Parse `expr`, rejecting anything that is not well-formed before any
    /// tree is consulted.
    ///
    /// # Errors
    /// [`PathError::Malformed`] for an empty expression, a missing root marker,
    /// an empty segment, an invalid field name or a bad index.
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let malformed = |reason: String| PathError::Malformed {
            path: expr.to_owned(),
            reason,
        };

        if expr.is_empty() {
            return Err(malformed("path is empty".into()));
        }
        let rest = expr
            .strip_prefix(ROOT)
            .ok_or_else(|| malformed(format!("path must start with '{ROOT}'")))?;
        if rest.is_empty() {
            return Ok(Self {
                source: expr.to_owned(),
                segments: Vec::new(),
            });
        }
        let rest = rest
            .strip_prefix('.')
            .ok_or_else(|| malformed(format!("expected '.' after '{ROOT}'")))?;

        let segments = rest
            .split('.')
            .enumerate()
            .map(|(position, raw)| {
                parse_segment(raw).map_err(|reason| malformed(format!("segment {position}: {reason}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source: expr.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[RawSegment] {
        &self.segments
    }

    /// Check every field name and index against the addressable attributes.
    ///
    /// # Errors
    /// [`PathError::NotFound`] at the first segment naming an unknown field or
    /// lacking an index.
    pub fn to_node_path(&self) -> Result<NodePath, PathError> {
        self.segments
            .iter()
            .enumerate()
            .map(|(position, raw)| self.concrete(position, raw))
            .collect::<Result<Vec<_>, _>>()
            .map(NodePath)
    }

    fn concrete(&self, position: usize, raw: &RawSegment) -> Result<Segment, PathError> {
        let field = Field::from_name(&raw.field).ok_or_else(|| {
            self.not_found(position, format!("'{}' is not an addressable field", raw.field))
        })?;
        let index = raw
            .index
            .ok_or_else(|| self.not_found(position, format!("'{field}' requires an index")))?;
        Ok(Segment { field, index })
    }

    /// A [`PathError::NotFound`] pointing at the segment at `position`.
    pub fn not_found(&self, position: usize, reason: impl Into<String>) -> PathError {
        PathError::NotFound {
            path: self.source.clone(),
            segment: self
                .segments
                .get(position)
                .map(ToString::to_string)
                .unwrap_or_default(),
            index: position,
            reason: reason.into(),
        }
    }
}

fn parse_segment(raw: &str) -> Result<RawSegment, String> {
    if raw.is_empty() {
        return Err("empty segment".into());
    }

    let (name, index) = match raw.find('[') {
        None => (raw, None),
        Some(open) => {
            let inner = raw[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| format!("'{raw}' must end with ']'"))?;
            if inner.is_empty() {
                return Err(format!("'{raw}' has an empty index"));
            }
            if !inner.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("index '{inner}' is not a non-negative integer"));
            }
            let index = inner
                .parse::<usize>()
                .map_err(|_| format!("index '{inner}' is out of range"))?;
            (&raw[..open], Some(index))
        }
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(format!("'{raw}' is missing a field name")),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(c) => return Err(format!("field name cannot start with '{c}'")),
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!("invalid character '{c}' in field name '{name}'"));
    }

    Ok(RawSegment {
        field: name.to_owned(),
        index,
    })
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `expr` against `tree`, returning the node it addresses.
///
/// Read-only; safe to call from any number of readers.
///
/// # Errors
/// - [`PathError::Malformed`] if `expr` is not a well-formed path.
/// - [`PathError::NotFound`] naming the first segment that does not resolve.
pub fn resolve_path<'a>(tree: &'a WorkflowNode, expr: &str) -> Result<&'a WorkflowNode, PathError> {
    let parsed = PathExpr::parse(expr)?;
    let mut current = tree;
    for (position, raw) in parsed.segments().iter().enumerate() {
        let segment = parsed.concrete(position, raw)?;
        current = current
            .child(segment.field, segment.index)
            .ok_or_else(|| parsed.not_found(position, describe_miss(current, segment)))?;
    }
    Ok(current)
}

/// Why `segment` does not resolve below `node`.
pub(crate) fn describe_miss(node: &WorkflowNode, segment: Segment) -> String {
    let count = node.child_count(segment.field);
    match (&node.step, segment.field) {
        (StepKind::Agent { inputs, .. }, Field::Input) if segment.index < count => {
            let name = inputs
                .get_index(segment.index)
                .map(|(name, _)| name.as_str())
                .unwrap_or_default();
            format!("input '{name}' is not a nested step")
        }
        _ if count == 0 => format!("{} node has no '{}' entries", node.kind_name(), segment.field),
        _ => format!(
            "index {} is out of range ({} node has {} '{}' entries)",
            segment.index,
            node.kind_name(),
            count,
            segment.field
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchCase, InputSource};
    use serde_json::json;

    fn malformed(expr: &str) -> bool {
        matches!(PathExpr::parse(expr), Err(PathError::Malformed { .. }))
    }

    fn sample_tree() -> WorkflowNode {
        // $                       sequence
        // $.input[0]              agent "fetch"
        // $.input[1]              loop
        // $.input[1].item[0]      sequence (body)
        // $.input[1].item[0].input[0]  agent "clean"
        // $.input[1].item[0].input[1]  agent "score" with nested step at input[1]
        WorkflowNode::sequence(vec![
            WorkflowNode::agent("fetch").with_id("fetch"),
            WorkflowNode::loop_over(
                InputSource::path("$.input[0]"),
                WorkflowNode::sequence(vec![
                    WorkflowNode::agent("clean").with_id("clean"),
                    WorkflowNode::agent("score")
                        .with_id("score")
                        .with_input("raw", InputSource::Element)
                        .with_input("model", InputSource::step(WorkflowNode::agent("pick").with_id("pick"))),
                ]),
            ),
        ])
    }

    #[test]
    fn parses_and_displays_bit_exact() {
        let expr = "$.input[2].item[0].input[1]";
        let path: NodePath = expr.parse().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), expr);
        assert_eq!(NodePath::root().to_string(), "$");
        assert!("$".parse::<NodePath>().unwrap().is_root());
    }

    #[test]
    fn malformed_paths_are_rejected_before_traversal() {
        for expr in [
            "",
            "input[0]",
            "$input[0]",
            "$.",
            "$..input[0]",
            "$.input[0].",
            "$.input[",
            "$.input[]",
            "$.input[-1]",
            "$.input[a]",
            "$.input[1][2]",
            "$.input[1]x",
            "$.[1]",
            "$.1input[0]",
            "$.in put[0]",
            "$.input[0]*",
        ] {
            assert!(malformed(expr), "expected '{expr}' to be malformed");
        }
    }

    #[test]
    fn resolves_nested_nodes() {
        let tree = sample_tree();
        assert_eq!(resolve_path(&tree, "$").unwrap(), &tree);
        assert_eq!(resolve_path(&tree, "$.input[0]").unwrap().id.as_deref(), Some("fetch"));
        assert_eq!(
            resolve_path(&tree, "$.input[1].item[0].input[1]").unwrap().id.as_deref(),
            Some("score")
        );
        assert_eq!(
            resolve_path(&tree, "$.input[1].item[0].input[1].input[1]").unwrap().id.as_deref(),
            Some("pick")
        );
    }

    #[test]
    fn unrelated_sibling_edits_do_not_move_a_path() {
        let mut tree = sample_tree();
        let before = resolve_path(&tree, "$.input[1].item[0]").unwrap().clone();

        if let StepKind::Sequence { children } = &mut tree.step {
            children[0] = WorkflowNode::sequence(vec![WorkflowNode::agent("other")]);
        }

        assert_eq!(resolve_path(&tree, "$.input[1].item[0]").unwrap(), &before);
    }

    #[test]
    fn out_of_range_index_names_the_failing_segment() {
        let tree = sample_tree();
        let err = resolve_path(&tree, "$.input[1].item[0].input[7].input[0]").unwrap_err();
        match err {
            PathError::NotFound { segment, index, reason, .. } => {
                assert_eq!(segment, "input[7]");
                assert_eq!(index, 2);
                assert!(reason.contains("out of range"), "{reason}");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_and_missing_index_are_not_found() {
        let tree = sample_tree();
        assert!(matches!(
            resolve_path(&tree, "$.children[0]"),
            Err(PathError::NotFound { index: 0, .. })
        ));
        assert!(matches!(
            resolve_path(&tree, "$.input[1].item"),
            Err(PathError::NotFound { index: 1, .. })
        ));
    }

    #[test]
    fn literal_agent_input_is_not_addressable() {
        let tree = sample_tree();
        let err = resolve_path(&tree, "$.input[1].item[0].input[1].input[0]").unwrap_err();
        assert!(
            matches!(&err, PathError::NotFound { index: 3, reason, .. } if reason.contains("not a nested step")),
            "{err:?}"
        );
    }

    #[test]
    fn branch_default_sits_after_the_cases() {
        let tree = WorkflowNode::branch(
            InputSource::literal(true),
            vec![BranchCase { when: json!(true), node: WorkflowNode::agent("yes").with_id("yes") }],
            Some(WorkflowNode::agent("no").with_id("no")),
        );
        assert_eq!(resolve_path(&tree, "$.input[1]").unwrap().id.as_deref(), Some("no"));
        assert!(resolve_path(&tree, "$.input[2]").is_err());
    }

    #[test]
    fn node_path_serialises_as_its_expression() {
        let path = NodePath::root().child(Field::Input, 1).child(Field::Item, 2);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, json!("$.input[1].item[2]"));
        let back: NodePath = serde_json::from_value(json).unwrap();
        assert_eq!(back, path);
    }
}
