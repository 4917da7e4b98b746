//! Crate level error type

use crate::action::ActionError;
use crate::config::ConfigError;
use crate::flow::FlowError;
use crate::storage::StorageError;
use crate::validation::ValidationError;
use thiserror::Error;

/// Main error type for the library
#[derive(Debug, Error)]
pub enum FlowTriggerError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A definition failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Flow state machine misuse
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    /// Action execution failure surfaced to a caller
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Definition or execution log storage failed
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Flow not found in the store
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Trigger not found in the store
    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    /// YAML serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<StorageError> for FlowTriggerError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::FlowNotFound(id) => FlowTriggerError::FlowNotFound(id.to_string()),
            StorageError::TriggerNotFound(id) => FlowTriggerError::TriggerNotFound(id.to_string()),
            StorageError::Validation(e) => FlowTriggerError::Validation(e),
            other => FlowTriggerError::Storage(other),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FlowTriggerError>;
