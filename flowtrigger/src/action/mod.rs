//! Actions run when a trigger fires
//!
//! Each [`Action`] is routed by type to a registered [`ActionSender`]. The
//! [`ActionExecutor`] wraps every send in a timeout and a retry policy, and
//! the [`ActionPool`] runs jobs on a bounded set of workers.

mod executor;
mod pool;
mod senders;

pub use executor::{ActionExecutor, RetryPolicy, RetryStrategy};
pub use pool::{ActionJob, ActionPool};
pub use senders::{FlowSender, LoggingSender};

use crate::events::{EventData, EventType, Scope};
use crate::flow::FlowInstanceId;
use crate::trigger::TriggerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of action, selecting the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Send an email
    Email,
    /// Call an HTTP endpoint
    Webhook,
    /// Start a flow instance
    Flow,
    /// Write a record
    Database,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ActionType::Email => "email",
            ActionType::Webhook => "webhook",
            ActionType::Flow => "flow",
            ActionType::Database => "database",
        };
        f.write_str(text)
    }
}

/// One step of a trigger's action list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Sender selector
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Sender-specific configuration
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(EventData::new())
}

impl Action {
    /// Create an action
    pub fn new(action_type: ActionType, config: Value) -> Self {
        Self {
            action_type,
            config,
        }
    }
}

/// What a sender knows about the fire it is serving
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionContext {
    /// Trigger that fired
    pub trigger_id: TriggerId,
    /// Event type that fired it
    pub event_type: EventType,
    /// Event data
    pub event_data: EventData,
    /// Event scope
    pub scope: Scope,
    /// Flow instance that produced the event
    pub instance_id: Option<FlowInstanceId>,
    /// Trigger -> flow hops so far
    pub cascade_depth: u32,
}

/// Errors raised while executing an action
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    /// Transient failure, the attempt may be repeated
    #[error("Retryable failure: {0}")]
    Retryable(String),

    /// Permanent failure
    #[error("Terminal failure: {0}")]
    Terminal(String),

    /// The attempt exceeded its timeout
    #[error("Action execution timed out after {timeout:?}")]
    Timeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// No sender is registered for the action type
    #[error("No sender registered for action type '{0}'")]
    NoSender(ActionType),

    /// A flow action would exceed the cascade limit
    #[error("Cascade depth {depth} exceeds the limit of {limit}")]
    CascadeLimit {
        /// Depth the new flow would run at
        depth: u32,
        /// Configured limit
        limit: u32,
    },
}

impl ActionError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Retryable(_) | ActionError::Timeout { .. })
    }
}

/// Pluggable transport for one action type
#[async_trait]
pub trait ActionSender: Send + Sync {
    /// Perform the action once
    async fn send(&self, config: &Value, context: &ActionContext) -> Result<Value, ActionError>;
}

/// Result of executing one action, including retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the action eventually succeeded
    pub ok: bool,
    /// Sender output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Last error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts made
    pub attempts: u32,
    /// Wall time including backoff
    pub duration_ms: u64,
}
