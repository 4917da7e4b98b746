//! Creation-time validation
//!
//! Conditions, branches, flows and triggers are end-user authored data. Every
//! structural problem is rejected when the entity is created or stored, so the
//! evaluator and the dispatcher only ever see well-formed definitions.

use crate::common::IdError;
use crate::condition::{FieldType, Operator};
use thiserror::Error;

/// Errors raised while validating user-authored definitions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A leaf condition names no field
    #[error("Condition field cannot be empty")]
    EmptyField,

    /// A leaf condition has no operator
    #[error("Condition on field '{0}' has no operator")]
    MissingOperator(String),

    /// The operator name is not recognised
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    /// The condition value does not have the shape the operator expects
    #[error("Operator '{operator}' on field '{field}' expects {expected}")]
    InvalidValue {
        /// Field the condition tests
        field: String,
        /// Operator of the condition
        operator: Operator,
        /// Description of the expected value shape
        expected: &'static str,
    },

    /// The declared field type is not compatible with the operator
    #[error("Operator '{operator}' cannot be used with {field_type} field '{field}'")]
    IncompatibleOperator {
        /// Field the condition tests
        field: String,
        /// Operator of the condition
        operator: Operator,
        /// Declared type of the field
        field_type: FieldType,
    },

    /// An identifier was malformed
    #[error(transparent)]
    InvalidId(#[from] IdError),

    /// Two levels in one flow share an identifier
    #[error("Duplicate level id '{0}'")]
    DuplicateLevel(String),

    /// Two levels in one flow share an order value
    #[error("Levels '{first}' and '{second}' share order {order}")]
    DuplicateLevelOrder {
        /// Level already holding the order
        first: String,
        /// Level that collided with it
        second: String,
        /// The shared order value
        order: i32,
    },

    /// Two branches in one flow share an identifier
    #[error("Duplicate branch id '{0}'")]
    DuplicateBranch(String),

    /// A branch or task references a level that does not exist
    #[error("Level '{0}' does not exist in this flow")]
    UnknownLevel(String),

    /// A branch points at a level whose order is not strictly greater
    #[error(
        "Branch '{branch}' must target a later level: '{from}' (order {from_order}) -> '{to}' (order {to_order})"
    )]
    BackwardBranch {
        /// Offending branch
        branch: String,
        /// Source level
        from: String,
        /// Source level order
        from_order: i32,
        /// Target level
        to: String,
        /// Target level order
        to_order: i32,
    },

    /// A task appears twice on the same level
    #[error("Task '{task}' already placed on level '{level}'")]
    DuplicateTask {
        /// Task identifier
        task: String,
        /// Level identifier
        level: String,
    },

    /// A flow cannot be published or started without levels
    #[error("Flow '{0}' has no levels")]
    EmptyFlow(String),

    /// An active trigger must carry at least one action
    #[error("Trigger '{0}' has no actions")]
    NoActions(String),
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Implemented by every user-authored definition
pub trait Validatable {
    /// Check the definition, returning the first problem found
    fn validate(&self) -> ValidationResult<()>;
}
