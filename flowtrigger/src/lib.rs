//! # FlowTrigger
//!
//! Trigger condition evaluation and flow branching engine for no-code
//! business processes.
//!
//! ## Features
//!
//! - **Condition trees**: nested AND/OR groups of typed leaf conditions,
//!   evaluated fail-closed with a structured trace
//! - **Flow branching**: prioritized branches between levels with a
//!   sequential default path
//! - **Flow progression**: a per-instance serialized state machine that emits
//!   lifecycle events
//! - **Trigger dispatch**: scope matching, duplicate suppression, business
//!   hours gating and delayed action execution on a bounded worker pool
//! - **Execution log**: append-only audit trail of every trigger evaluation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowtrigger::condition::{evaluate_group, Condition, ConditionGroup, Operator};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let group = ConditionGroup::and(vec![
//!     Condition::new("status", Operator::Equals, Some(json!("COMPLETED")))?.into(),
//! ]);
//!
//! let data = json!({ "status": "COMPLETED" });
//! let outcome = evaluate_group(Some(&group), data.as_object().unwrap());
//! assert!(outcome.matched);
//! println!("{}", outcome.trace);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Shared helpers (environment loading, identifiers)
pub mod common;

/// Engine configuration loaded from defaults, environment and YAML
pub mod config;

/// Condition trees and the condition evaluator
pub mod condition;

/// Flow, level and branch model plus the progression state machine
pub mod flow;

/// Domain events consumed by the trigger dispatcher
pub mod events;

/// Trigger definitions and the trigger dispatcher
pub mod trigger;

/// Action execution: senders, retry policy and the worker pool
pub mod action;

/// Append-only trigger execution log
pub mod execution_log;

/// Read-side persistence seams for flows and triggers
pub mod storage;

/// Creation-time validation errors
pub mod validation;

/// Wiring of all components into a running engine
pub mod engine;

/// Crate level error type
pub mod error;

pub use action::{Action, ActionError, ActionExecutor, ActionResult, ActionSender, ActionType};
pub use condition::{
    evaluate, evaluate_group, Condition, ConditionGroup, ConditionNode, EvaluationOutcome,
    FieldType, LogicalOperator, Operator, TraceNode,
};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{FlowTriggerError, Result};
pub use events::{DomainEvent, EventData, EventType, Scope};
pub use execution_log::{ExecutionLog, ExecutionStatus, TriggerExecution};
pub use flow::{
    Branch, Flow, FlowError, FlowId, FlowInstance, FlowInstanceId, FlowProgression, FlowStatus,
    InstanceStatus, Level, LevelId, LevelTask, NextLevel, TaskId,
};
pub use trigger::{TestReport, Trigger, TriggerDispatcher, TriggerId, TriggerSettings};
pub use validation::ValidationError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionType, Branch, Condition, ConditionGroup, ConditionNode, DomainEvent,
        Engine, EngineBuilder, EngineConfig, EventData, EventType, Flow, FlowError, FlowId,
        FlowProgression, FlowTriggerError, Level, LevelId, LogicalOperator, Operator, Result,
        Scope, Trigger, TriggerDispatcher, TriggerId, TriggerSettings,
    };
}

/// Test utilities module for testing support
#[doc(hidden)]
pub mod test_utils;
