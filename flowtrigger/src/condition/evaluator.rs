//! The condition evaluator
//!
//! Evaluation is pure: the same tree and data always produce the same result
//! and trace. Coercion failures never escape; they turn the leaf into a
//! non-match and are recorded in the trace note.

use super::coerce::{compare, loosely_equal, to_bool, to_date, to_text};
use super::{Condition, ConditionGroup, ConditionNode, LogicalOperator, Operator, TraceNode};
use crate::events::EventData;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

/// Reasons a comparison could not be carried out
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    /// Value is not a strict decimal number
    #[error("value '{0}' is not a number")]
    NotANumber(String),
    /// Value is not a recognised date or date-time
    #[error("value '{0}' is not a date")]
    NotADate(String),
    /// Value is not a boolean
    #[error("value '{0}' is not a boolean")]
    NotABoolean(String),
    /// Value has no text representation
    #[error("value '{0}' is not text")]
    NotText(String),
    /// The two sides cannot be compared
    #[error("cannot compare '{actual}' with '{expected}'")]
    TypeMismatch {
        /// Field side
        actual: String,
        /// Condition side
        expected: String,
    },
    /// The condition value does not have the shape the operator needs
    #[error("operator '{operator}' expects {expected}")]
    BadOperand {
        /// Operator being applied
        operator: Operator,
        /// Expected value shape
        expected: &'static str,
    },
}

/// Result of evaluating a condition tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    /// Whether the tree matched
    pub matched: bool,
    /// Structured explanation of the result
    pub trace: TraceNode,
}

/// Resolve a dot-path inside event data
///
/// An exact top-level key wins over path splitting, so keys that contain dots
/// remain addressable. Numeric segments index into arrays.
pub fn resolve_path<'a>(data: &'a EventData, path: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Evaluate an optional condition tree; `None` always matches
pub fn evaluate(node: Option<&ConditionNode>, data: &EventData) -> EvaluationOutcome {
    let trace = match node {
        None => TraceNode::Always,
        Some(node) => evaluate_node(node, data),
    };
    EvaluationOutcome {
        matched: trace.matched(),
        trace,
    }
}

/// Evaluate an optional top-level group; `None` always matches
pub fn evaluate_group(group: Option<&ConditionGroup>, data: &EventData) -> EvaluationOutcome {
    let trace = match group {
        None => TraceNode::Always,
        Some(group) => evaluate_tree_group(group, data),
    };
    EvaluationOutcome {
        matched: trace.matched(),
        trace,
    }
}

fn evaluate_node(node: &ConditionNode, data: &EventData) -> TraceNode {
    match node {
        ConditionNode::Leaf(condition) => evaluate_leaf(condition, data),
        ConditionNode::Group(group) => evaluate_tree_group(group, data),
    }
}

fn evaluate_tree_group(group: &ConditionGroup, data: &EventData) -> TraceNode {
    // Empty AND is true, empty OR is false.
    let short_circuit_on = match group.operator {
        LogicalOperator::And => false,
        LogicalOperator::Or => true,
    };
    let mut matched = !short_circuit_on;
    let mut children = Vec::with_capacity(group.children.len());

    for child in &group.children {
        let trace = evaluate_node(child, data);
        let child_matched = trace.matched();
        children.push(trace);
        if child_matched == short_circuit_on {
            matched = short_circuit_on;
            break;
        }
    }

    TraceNode::Group {
        operator: group.operator,
        matched,
        skipped: group.children.len() - children.len(),
        children,
    }
}

fn evaluate_leaf(condition: &Condition, data: &EventData) -> TraceNode {
    // Explicit null counts as absent.
    let actual = resolve_path(data, &condition.field).filter(|v| !v.is_null());
    let expected = condition.value.as_ref().filter(|v| !v.is_null());

    let (matched, note) = match actual {
        None => (condition.operator.matches_absent(), None),
        Some(actual) => match apply(condition.operator, actual, expected) {
            Ok(matched) => (matched, None),
            Err(e) => {
                tracing::warn!(
                    field = %condition.field,
                    operator = %condition.operator,
                    "condition failed closed: {}",
                    e
                );
                (false, Some(e.to_string()))
            }
        },
    };

    TraceNode::Leaf {
        field: condition.field.clone(),
        operator: condition.operator,
        expected: expected.cloned(),
        actual: actual.cloned(),
        matched,
        note,
    }
}

fn scalar<'a>(op: Operator, expected: Option<&'a Value>) -> Result<&'a Value, EvaluationError> {
    expected.ok_or(EvaluationError::BadOperand {
        operator: op,
        expected: "a value",
    })
}

fn list<'a>(op: Operator, expected: Option<&'a Value>) -> Result<&'a [Value], EvaluationError> {
    match expected {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(EvaluationError::BadOperand {
            operator: op,
            expected: "a list of values",
        }),
    }
}

fn contains(actual: &Value, needle: &Value) -> Result<bool, EvaluationError> {
    match actual {
        Value::Array(items) => Ok(items
            .iter()
            .any(|item| loosely_equal(item, needle).unwrap_or(false))),
        other => Ok(to_text(other)?.contains(&to_text(needle)?)),
    }
}

fn member_of(actual: &Value, items: &[Value]) -> bool {
    items
        .iter()
        .any(|item| loosely_equal(actual, item).unwrap_or(false))
}

fn apply(op: Operator, actual: &Value, expected: Option<&Value>) -> Result<bool, EvaluationError> {
    use Operator::*;
    match op {
        Equals => loosely_equal(actual, scalar(op, expected)?),
        NotEquals => loosely_equal(actual, scalar(op, expected)?).map(|eq| !eq),
        GreaterThan => Ok(compare(actual, scalar(op, expected)?)? == Ordering::Greater),
        LessThan => Ok(compare(actual, scalar(op, expected)?)? == Ordering::Less),
        GreaterThanOrEqual => Ok(compare(actual, scalar(op, expected)?)? != Ordering::Less),
        LessThanOrEqual => Ok(compare(actual, scalar(op, expected)?)? != Ordering::Greater),
        Contains => contains(actual, scalar(op, expected)?),
        NotContains => contains(actual, scalar(op, expected)?).map(|found| !found),
        StartsWith => Ok(to_text(actual)?.starts_with(&to_text(scalar(op, expected)?)?)),
        EndsWith => Ok(to_text(actual)?.ends_with(&to_text(scalar(op, expected)?)?)),
        In => Ok(member_of(actual, list(op, expected)?)),
        NotIn => Ok(!member_of(actual, list(op, expected)?)),
        Before => Ok(to_date(actual)? < to_date(scalar(op, expected)?)?),
        After => Ok(to_date(actual)? > to_date(scalar(op, expected)?)?),
        Between => match list(op, expected)? {
            [low, high] => Ok(compare(actual, low)? != Ordering::Less
                && compare(actual, high)? != Ordering::Greater),
            _ => Err(EvaluationError::BadOperand {
                operator: op,
                expected: "a [low, high] pair",
            }),
        },
        // Absent and null are handled before dispatch.
        IsNull => Ok(false),
        IsNotNull => Ok(true),
        IsTrue => to_bool(actual),
        IsFalse => to_bool(actual).map(|b| !b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> EventData {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn leaf(field: &str, op: Operator, value: Option<Value>) -> ConditionNode {
        Condition::new(field, op, value).unwrap().into()
    }

    fn check(field: &str, op: Operator, value: Option<Value>, event: Value) -> bool {
        evaluate(Some(&leaf(field, op, value)), &data(event)).matched
    }

    #[test]
    fn test_null_tree_matches() {
        let outcome = evaluate(None, &EventData::new());
        assert!(outcome.matched);
        assert_eq!(outcome.trace, TraceNode::Always);
        assert!(evaluate_group(None, &EventData::new()).matched);
    }

    #[test]
    fn test_empty_groups() {
        let empty = EventData::new();
        assert!(evaluate_group(Some(&ConditionGroup::and(vec![])), &empty).matched);
        assert!(!evaluate_group(Some(&ConditionGroup::or(vec![])), &empty).matched);
    }

    #[test]
    fn test_dot_path_resolution() {
        let event = data(json!({
            "customer": {"address": {"city": "Lyon"}},
            "items": [{"sku": "A1"}, {"sku": "B2"}],
            "a.b": "literal"
        }));
        assert_eq!(resolve_path(&event, "customer.address.city"), Some(&json!("Lyon")));
        assert_eq!(resolve_path(&event, "items.1.sku"), Some(&json!("B2")));
        assert_eq!(resolve_path(&event, "a.b"), Some(&json!("literal")));
        assert_eq!(resolve_path(&event, "items.9.sku"), None);
        assert_eq!(resolve_path(&event, "customer.address.city.zip"), None);
    }

    #[test]
    fn test_absent_field_policy() {
        let empty = json!({});
        assert!(check("x", Operator::IsNull, None, empty.clone()));
        assert!(!check("x", Operator::IsNotNull, None, empty.clone()));
        assert!(check("x", Operator::NotEquals, Some(json!("a")), empty.clone()));
        assert!(check("x", Operator::NotContains, Some(json!("a")), empty.clone()));
        assert!(check("x", Operator::NotIn, Some(json!(["a"])), empty.clone()));
        assert!(!check("x", Operator::Equals, Some(json!("a")), empty.clone()));
        assert!(!check("x", Operator::GreaterThan, Some(json!(1)), empty.clone()));
        assert!(!check("x", Operator::IsFalse, None, empty));

        let null = json!({"x": null});
        assert!(check("x", Operator::IsNull, None, null.clone()));
        assert!(check("x", Operator::NotEquals, Some(json!("a")), null));
    }

    #[test]
    fn test_numeric_coercion_fails_closed() {
        assert!(check("amount", Operator::GreaterThan, Some(json!(100)), json!({"amount": "150"})));
        let outcome = evaluate(
            Some(&leaf("amount", Operator::GreaterThan, Some(json!(100)))),
            &data(json!({"amount": "abc"})),
        );
        assert!(!outcome.matched);
        match outcome.trace {
            TraceNode::Leaf { note, .. } => assert!(note.unwrap().contains("abc")),
            other => panic!("unexpected trace {other:?}"),
        }
        assert!(!check("amount", Operator::LessThan, Some(json!(100)), json!({"amount": "1e1"})));
    }

    #[test]
    fn test_text_operators_are_case_sensitive() {
        let event = json!({"name": "Acme Corp", "tags": ["vip", "eu"], "code": 12345});
        assert!(check("name", Operator::Contains, Some(json!("Corp")), event.clone()));
        assert!(!check("name", Operator::Contains, Some(json!("corp")), event.clone()));
        assert!(check("name", Operator::StartsWith, Some(json!("Acme")), event.clone()));
        assert!(check("name", Operator::EndsWith, Some(json!("Corp")), event.clone()));
        assert!(check("tags", Operator::Contains, Some(json!("vip")), event.clone()));
        assert!(!check("tags", Operator::Contains, Some(json!("vi")), event.clone()));
        assert!(check("tags", Operator::NotContains, Some(json!("us")), event.clone()));
        assert!(check("code", Operator::StartsWith, Some(json!("123")), event));
    }

    #[test]
    fn test_membership_uses_equality_coercion() {
        let event = json!({"priority": "2", "region": "EU"});
        assert!(check("priority", Operator::In, Some(json!([1, 2, 3])), event.clone()));
        assert!(check("region", Operator::NotIn, Some(json!(["US", "APAC"])), event.clone()));
        assert!(!check("region", Operator::In, Some(json!([])), event));
    }

    #[test]
    fn test_dates_and_between() {
        let event = json!({"due": "2024-05-10", "score": 50});
        assert!(check("due", Operator::Before, Some(json!("2024-05-11T00:00:00Z")), event.clone()));
        assert!(check("due", Operator::After, Some(json!("2024-05-09")), event.clone()));
        assert!(!check("due", Operator::After, Some(json!("2024-05-10")), event.clone()));
        assert!(check("due", Operator::Between, Some(json!(["2024-05-10", "2024-05-31"])), event.clone()));
        assert!(check("score", Operator::Between, Some(json!([50, 100])), event.clone()));
        assert!(check("score", Operator::Between, Some(json!([0, 50])), event.clone()));
        assert!(!check("score", Operator::Between, Some(json!([51, 100])), event.clone()));
        assert!(!check("due", Operator::Before, Some(json!("tomorrow")), event));
    }

    #[test]
    fn test_booleans() {
        let event = json!({"vip": true, "flag": "false", "count": 1});
        assert!(check("vip", Operator::IsTrue, None, event.clone()));
        assert!(check("flag", Operator::IsFalse, None, event.clone()));
        assert!(!check("count", Operator::IsTrue, None, event.clone()));
        assert!(!check("count", Operator::IsFalse, None, event));
    }

    #[test]
    fn test_and_short_circuits_and_records_skips() {
        let group = ConditionGroup::and(vec![
            leaf("a", Operator::Equals, Some(json!(1))),
            leaf("b", Operator::Equals, Some(json!(2))),
            leaf("c", Operator::Equals, Some(json!(3))),
        ]);
        let outcome = evaluate_group(Some(&group), &data(json!({"a": 1, "b": 0, "c": 3})));
        assert!(!outcome.matched);
        match outcome.trace {
            TraceNode::Group { children, skipped, .. } => {
                assert_eq!(children.len(), 2);
                assert_eq!(skipped, 1);
            }
            other => panic!("unexpected trace {other:?}"),
        }
    }

    #[test]
    fn test_or_short_circuits_on_first_true() {
        let group = ConditionGroup::or(vec![
            leaf("a", Operator::IsTrue, None),
            leaf("b", Operator::IsTrue, None),
        ]);
        let outcome = evaluate_group(Some(&group), &data(json!({"a": true})));
        assert!(outcome.matched);
        assert_eq!(outcome.trace.evaluated_leaves(), 1);
    }

    #[test]
    fn test_nested_groups() {
        let group = ConditionGroup::and(vec![
            leaf("status", Operator::Equals, Some(json!("COMPLETED"))),
            ConditionGroup::or(vec![
                leaf("amount", Operator::GreaterThanOrEqual, Some(json!(1000))),
                leaf("customer.tier", Operator::In, Some(json!(["gold", "platinum"]))),
            ])
            .into(),
        ]);
        let hit = json!({"status": "COMPLETED", "amount": 10, "customer": {"tier": "gold"}});
        let miss = json!({"status": "COMPLETED", "amount": 10, "customer": {"tier": "silver"}});
        assert!(evaluate_group(Some(&group), &data(hit)).matched);
        assert!(!evaluate_group(Some(&group), &data(miss)).matched);
    }
}
