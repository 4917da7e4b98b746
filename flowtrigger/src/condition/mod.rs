//! Condition trees
//!
//! A condition tree is a recursive structure of leaf [`Condition`]s and
//! [`ConditionGroup`]s joined by AND/OR. Trees are pure data: they are
//! validated once when constructed or deserialized and then evaluated any
//! number of times by [`evaluate`].

mod coerce;
mod evaluator;
mod operator;
mod trace;

pub use evaluator::{evaluate, evaluate_group, resolve_path, EvaluationError, EvaluationOutcome};
pub use operator::{FieldType, Operator, ValueShape};
pub use trace::TraceNode;

use crate::validation::{Validatable, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

impl FromStr for Operator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "greater_than_or_equal" | ">=" => Operator::GreaterThanOrEqual,
            "less_than_or_equal" | "<=" => Operator::LessThanOrEqual,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "before" => Operator::Before,
            "after" => Operator::After,
            "between" => Operator::Between,
            "is_null" => Operator::IsNull,
            "is_not_null" => Operator::IsNotNull,
            "is_true" => Operator::IsTrue,
            "is_false" => Operator::IsFalse,
            other => return Err(ValidationError::UnknownOperator(other.to_string())),
        };
        Ok(op)
    }
}

/// Logical operator joining the children of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOperator {
    /// Every child must match
    #[serde(rename = "AND", alias = "and")]
    And,
    /// At least one child must match
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => f.write_str("AND"),
            LogicalOperator::Or => f.write_str("OR"),
        }
    }
}

/// A leaf condition testing one field of the event data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCondition")]
pub struct Condition {
    /// Dot-path into the event data
    pub field: String,
    /// Comparison to apply
    pub operator: Operator,
    /// Comparison value, absent for unary operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Declared type of the field, when the builder knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
}

impl Condition {
    /// Create and validate a leaf condition
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: Option<Value>,
    ) -> ValidationResult<Self> {
        let condition = Self {
            field: field.into(),
            operator,
            value,
            field_type: None,
        };
        condition.validate()?;
        Ok(condition)
    }

    /// Attach a declared field type, re-checking operator compatibility
    pub fn with_field_type(mut self, field_type: FieldType) -> ValidationResult<Self> {
        self.field_type = Some(field_type);
        self.validate()?;
        Ok(self)
    }

    fn invalid_value(&self, expected: &'static str) -> ValidationError {
        ValidationError::InvalidValue {
            field: self.field.clone(),
            operator: self.operator,
            expected,
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

impl Validatable for Condition {
    fn validate(&self) -> ValidationResult<()> {
        if self.field.trim().is_empty() {
            return Err(ValidationError::EmptyField);
        }

        let value = self.value.as_ref().filter(|v| !v.is_null());
        match (self.operator.value_shape(), value) {
            (ValueShape::None, None) => {}
            (ValueShape::None, Some(_)) => return Err(self.invalid_value("no value")),
            (ValueShape::Scalar, Some(v)) if is_scalar(v) => {}
            (ValueShape::Scalar, _) => return Err(self.invalid_value("a single value")),
            (ValueShape::List, Some(Value::Array(items))) if items.iter().all(is_scalar) => {}
            (ValueShape::List, _) => return Err(self.invalid_value("a list of values")),
            (ValueShape::Range, Some(Value::Array(items)))
                if items.len() == 2 && items.iter().all(is_scalar) => {}
            (ValueShape::Range, _) => return Err(self.invalid_value("a [low, high] pair")),
        }

        if let Some(field_type) = self.field_type {
            if !self.operator.accepts(field_type) {
                return Err(ValidationError::IncompatibleOperator {
                    field: self.field.clone(),
                    operator: self.operator,
                    field_type,
                });
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    field: String,
    operator: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    field_type: Option<FieldType>,
}

impl TryFrom<RawCondition> for Condition {
    type Error = ValidationError;

    fn try_from(raw: RawCondition) -> Result<Self, Self::Error> {
        let operator = raw
            .operator
            .ok_or_else(|| ValidationError::MissingOperator(raw.field.clone()))?
            .parse()?;
        let condition = Condition {
            field: raw.field,
            operator,
            value: raw.value,
            field_type: raw.field_type,
        };
        condition.validate()?;
        Ok(condition)
    }
}

/// A group of conditions joined by AND or OR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionGroup {
    /// How children are combined
    pub operator: LogicalOperator,
    /// Child nodes, evaluated in order
    #[serde(default)]
    pub children: Vec<ConditionNode>,
}

impl ConditionGroup {
    /// AND group over the given children
    pub fn and(children: Vec<ConditionNode>) -> Self {
        Self {
            operator: LogicalOperator::And,
            children,
        }
    }

    /// OR group over the given children
    pub fn or(children: Vec<ConditionNode>) -> Self {
        Self {
            operator: LogicalOperator::Or,
            children,
        }
    }

    /// The group equivalent to "no conditions"
    pub fn always() -> Self {
        Self::and(Vec::new())
    }

    /// Number of leaf conditions in the tree
    pub fn leaf_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                ConditionNode::Leaf(_) => 1,
                ConditionNode::Group(group) => group.leaf_count(),
            })
            .sum()
    }
}

impl Validatable for ConditionGroup {
    fn validate(&self) -> ValidationResult<()> {
        self.children.iter().try_for_each(Validatable::validate)
    }
}

/// A node of a condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawNode")]
pub enum ConditionNode {
    /// A nested group
    Group(ConditionGroup),
    /// A leaf comparison
    Leaf(Condition),
}

impl Validatable for ConditionNode {
    fn validate(&self) -> ValidationResult<()> {
        match self {
            ConditionNode::Group(group) => group.validate(),
            ConditionNode::Leaf(condition) => condition.validate(),
        }
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        ConditionNode::Leaf(condition)
    }
}

impl From<ConditionGroup> for ConditionNode {
    fn from(group: ConditionGroup) -> Self {
        ConditionNode::Group(group)
    }
}

// A node is a group when it carries `children`, otherwise a leaf.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    field_type: Option<FieldType>,
    #[serde(default)]
    children: Option<Vec<ConditionNode>>,
}

impl TryFrom<RawNode> for ConditionNode {
    type Error = ValidationError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        if let Some(children) = raw.children {
            let operator = match raw.operator.as_deref() {
                Some("AND") | Some("and") => LogicalOperator::And,
                Some("OR") | Some("or") => LogicalOperator::Or,
                Some(other) => return Err(ValidationError::UnknownOperator(other.to_string())),
                None => return Err(ValidationError::MissingOperator("group".to_string())),
            };
            return Ok(ConditionNode::Group(ConditionGroup { operator, children }));
        }

        let field = raw.field.ok_or(ValidationError::EmptyField)?;
        Condition::try_from(RawCondition {
            field,
            operator: raw.operator,
            value: raw.value,
            field_type: raw.field_type,
        })
        .map(ConditionNode::Leaf)
    }
}
