//! Comparison operators and field type compatibility

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free text
    Text,
    /// Numeric input
    Number,
    /// Date or date-time
    Date,
    /// Checkbox / toggle
    Boolean,
    /// Dropdown / enumerated choice
    Dropdown,
}

impl FieldType {
    /// Get the string representation of the field type
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
            FieldType::Dropdown => "dropdown",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the comparison value an operator expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// No value (unary operators)
    None,
    /// A single scalar
    Scalar,
    /// An array of scalars
    List,
    /// A `[low, high]` pair
    Range,
}

/// Operator of a leaf condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Field equals value
    Equals,
    /// Field differs from value
    NotEquals,
    /// Field is strictly greater than value
    GreaterThan,
    /// Field is strictly less than value
    LessThan,
    /// Field is greater than or equal to value
    #[serde(alias = ">=")]
    GreaterThanOrEqual,
    /// Field is less than or equal to value
    #[serde(alias = "<=")]
    LessThanOrEqual,
    /// Field text contains value, or field list contains element
    Contains,
    /// Negation of `contains`
    NotContains,
    /// Field text starts with value
    StartsWith,
    /// Field text ends with value
    EndsWith,
    /// Field equals one of the listed values
    In,
    /// Field equals none of the listed values
    NotIn,
    /// Field date is strictly before value
    Before,
    /// Field date is strictly after value
    After,
    /// Field lies within `[low, high]`, inclusive
    Between,
    /// Field is absent or null
    IsNull,
    /// Field is present and not null
    IsNotNull,
    /// Field is boolean true
    IsTrue,
    /// Field is boolean false
    IsFalse,
}

const ALL_TYPES: &[FieldType] = &[
    FieldType::Text,
    FieldType::Number,
    FieldType::Date,
    FieldType::Boolean,
    FieldType::Dropdown,
];

impl Operator {
    /// Get the string representation used in definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThanOrEqual => "less_than_or_equal",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Before => "before",
            Operator::After => "after",
            Operator::Between => "between",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
            Operator::IsTrue => "is_true",
            Operator::IsFalse => "is_false",
        }
    }

    /// Field types this operator may be applied to
    pub fn compatible_types(&self) -> &'static [FieldType] {
        use FieldType::*;
        match self {
            Operator::Equals | Operator::NotEquals | Operator::IsNull | Operator::IsNotNull => {
                ALL_TYPES
            }
            Operator::GreaterThan
            | Operator::LessThan
            | Operator::GreaterThanOrEqual
            | Operator::LessThanOrEqual
            | Operator::Between => &[Number, Date],
            Operator::Contains | Operator::NotContains => &[Text, Dropdown],
            Operator::StartsWith | Operator::EndsWith => &[Text],
            Operator::In | Operator::NotIn => &[Text, Number, Dropdown],
            Operator::Before | Operator::After => &[Date],
            Operator::IsTrue | Operator::IsFalse => &[Boolean],
        }
    }

    /// Check whether the operator accepts the given field type
    pub fn accepts(&self, field_type: FieldType) -> bool {
        self.compatible_types().contains(&field_type)
    }

    /// Shape of the comparison value this operator expects
    pub fn value_shape(&self) -> ValueShape {
        match self {
            Operator::IsNull | Operator::IsNotNull | Operator::IsTrue | Operator::IsFalse => {
                ValueShape::None
            }
            Operator::In | Operator::NotIn => ValueShape::List,
            Operator::Between => ValueShape::Range,
            _ => ValueShape::Scalar,
        }
    }

    /// Result of this operator when the field is absent from the data
    ///
    /// Negative operators are permissive ("is not X" holds for a missing
    /// field), `is_null` holds, everything else fails closed.
    pub fn matches_absent(&self) -> bool {
        matches!(
            self,
            Operator::NotEquals | Operator::NotContains | Operator::NotIn | Operator::IsNull
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
