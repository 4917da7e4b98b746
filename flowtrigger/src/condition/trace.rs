//! Structured record of a condition evaluation

use super::coerce::describe;
use super::{LogicalOperator, Operator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One node of an evaluation trace
///
/// Groups hold an entry for every child that was evaluated; children skipped
/// by short-circuiting are only counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceNode {
    /// No conditions were configured
    Always,
    /// A leaf comparison
    Leaf {
        /// Field path
        field: String,
        /// Operator applied
        operator: Operator,
        /// Comparison value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<Value>,
        /// Resolved field value, `None` when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actual: Option<Value>,
        /// Leaf result
        matched: bool,
        /// Why a comparison failed closed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// A group of children
    Group {
        /// Logical operator of the group
        operator: LogicalOperator,
        /// Group result
        matched: bool,
        /// Traces of the evaluated children
        children: Vec<TraceNode>,
        /// Children not evaluated because of short-circuiting
        #[serde(default)]
        skipped: usize,
    },
}

impl TraceNode {
    /// Result recorded at this node
    pub fn matched(&self) -> bool {
        match self {
            TraceNode::Always => true,
            TraceNode::Leaf { matched, .. } | TraceNode::Group { matched, .. } => *matched,
        }
    }

    /// Number of leaves actually evaluated
    pub fn evaluated_leaves(&self) -> usize {
        match self {
            TraceNode::Always => 0,
            TraceNode::Leaf { .. } => 1,
            TraceNode::Group { children, .. } => {
                children.iter().map(TraceNode::evaluated_leaves).sum()
            }
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match self {
            TraceNode::Always => writeln!(f, "{indent}(no conditions) => true"),
            TraceNode::Leaf {
                field,
                operator,
                expected,
                actual,
                matched,
                note,
            } => {
                write!(f, "{indent}{field} {operator}")?;
                if let Some(expected) = expected {
                    write!(f, " {expected}")?;
                }
                match actual {
                    Some(actual) => write!(f, " (actual {})", describe(actual))?,
                    None => write!(f, " (absent)")?,
                }
                write!(f, " => {matched}")?;
                if let Some(note) = note {
                    write!(f, " [{note}]")?;
                }
                writeln!(f)
            }
            TraceNode::Group {
                operator,
                matched,
                children,
                skipped,
            } => {
                write!(f, "{indent}{operator} => {matched}")?;
                if *skipped > 0 {
                    write!(f, " ({skipped} skipped)")?;
                }
                writeln!(f)?;
                children
                    .iter()
                    .try_for_each(|child| child.write_indented(f, depth + 1))
            }
        }
    }
}

impl fmt::Display for TraceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
