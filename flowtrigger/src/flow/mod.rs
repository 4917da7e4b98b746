//! Flows, levels and branches
//!
//! A [`Flow`] is an ordered list of [`Level`]s with [`Branch`]es that can
//! route a completed level to a later one. The [`BranchResolver`] picks the
//! next level and [`FlowProgression`] drives running instances through the
//! flow.

mod definition;
mod instance;
mod progression;
mod resolver;

pub use definition::{Branch, Flow, FlowDefinition, FlowStatus, Level, LevelTask};
pub use instance::{FlowInstance, InstanceStatus, LevelVisit};
pub use progression::{FlowProgression, LevelTransition};
pub use resolver::{BranchEvaluation, BranchResolver, NextLevel, Resolution, ResolvedBy};

use crate::common::ids::{string_id, ulid_id};
use crate::storage::StorageError;
use crate::validation::ValidationError;
use thiserror::Error;

string_id!(
    /// Identifier of a flow
    FlowId,
    "Flow ID"
);

string_id!(
    /// Identifier of a level within a flow
    LevelId,
    "Level ID"
);

string_id!(
    /// Identifier of a branch within a flow
    BranchId,
    "Branch ID"
);

string_id!(
    /// Identifier of a task (data-entry form)
    TaskId,
    "Task ID"
);

ulid_id!(
    /// Identifier of a running flow instance
    FlowInstanceId,
    "flow instance ID"
);

/// Errors raised by flow definition changes and the progression state machine
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow must be published before instances can start
    #[error("Flow '{0}' is not published")]
    NotPublished(FlowId),

    /// Levels, tasks and branches cannot change once published
    #[error("Flow '{0}' is published and its structure can no longer change")]
    StructureFrozen(FlowId),

    /// The completed level is not the instance's current level
    #[error("Instance {instance} is at level {expected:?}, cannot complete level '{actual}'")]
    LevelMismatch {
        /// Instance being advanced
        instance: FlowInstanceId,
        /// Current level of the instance
        expected: Option<LevelId>,
        /// Level the caller tried to complete
        actual: LevelId,
    },

    /// The instance already finished
    #[error("Instance {0} is already completed")]
    InstanceCompleted(FlowInstanceId),

    /// No flow with that id exists
    #[error("Flow '{0}' not found")]
    FlowNotFound(FlowId),

    /// No instance with that id exists
    #[error("Flow instance {0} not found")]
    InstanceNotFound(FlowInstanceId),

    /// A level id did not resolve within the flow
    #[error("Level '{0}' not found")]
    LevelNotFound(LevelId),

    /// The flow store failed
    #[error("Flow storage error: {0}")]
    Storage(StorageError),

    /// A structural change failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl FlowError {
    /// State conflicts: the request is well formed but the current state forbids it
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            FlowError::NotPublished(_)
                | FlowError::StructureFrozen(_)
                | FlowError::LevelMismatch { .. }
                | FlowError::InstanceCompleted(_)
        )
    }

    /// Errors caused by the caller rather than the engine
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FlowError::Storage(_))
    }
}

impl From<StorageError> for FlowError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::FlowNotFound(id) => FlowError::FlowNotFound(id),
            other => FlowError::Storage(other),
        }
    }
}
