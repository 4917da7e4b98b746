//! Domain events
//!
//! Everything the dispatcher reacts to arrives as a [`DomainEvent`]: events
//! emitted by the flow state machine as well as events injected by external
//! sources such as database row changes, schedulers and inbound webhooks.

use crate::flow::{FlowId, FlowInstanceId, LevelId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tokio::sync::mpsc;

/// Runtime data carried by an event, addressed by dot-paths
pub type EventData = Map<String, Value>;

/// Kind of domain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A task form was submitted
    TaskCompleted,
    /// A task became current
    TaskStarted,
    /// A task form was saved without completing
    TaskUpdated,
    /// A single field changed value
    FieldChanged,
    /// A flow instance was created
    FlowStarted,
    /// A flow instance finished its last level
    FlowCompleted,
    /// A record was inserted
    DatabaseRowCreated,
    /// A record was modified
    DatabaseRowUpdated,
    /// A schedule fired
    Scheduled,
    /// An inbound webhook was received
    WebhookReceived,
}

impl EventType {
    /// Every event type, in declaration order
    pub const ALL: [EventType; 10] = [
        EventType::TaskCompleted,
        EventType::TaskStarted,
        EventType::TaskUpdated,
        EventType::FieldChanged,
        EventType::FlowStarted,
        EventType::FlowCompleted,
        EventType::DatabaseRowCreated,
        EventType::DatabaseRowUpdated,
        EventType::Scheduled,
        EventType::WebhookReceived,
    ];

    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCompleted => "TASK_COMPLETED",
            EventType::TaskStarted => "TASK_STARTED",
            EventType::TaskUpdated => "TASK_UPDATED",
            EventType::FieldChanged => "FIELD_CHANGED",
            EventType::FlowStarted => "FLOW_STARTED",
            EventType::FlowCompleted => "FLOW_COMPLETED",
            EventType::DatabaseRowCreated => "DATABASE_ROW_CREATED",
            EventType::DatabaseRowUpdated => "DATABASE_ROW_UPDATED",
            EventType::Scheduled => "SCHEDULED",
            EventType::WebhookReceived => "WEBHOOK_RECEIVED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task, flow and level an event belongs to, or a trigger listens on
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Task identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Flow identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<FlowId>,
    /// Level identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_id: Option<LevelId>,
}

impl Scope {
    /// Scope that matches every event
    pub fn any() -> Self {
        Self::default()
    }

    /// Scope limited to a task
    pub fn task(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    /// Scope limited to a flow
    pub fn flow(flow_id: impl Into<FlowId>) -> Self {
        Self {
            flow_id: Some(flow_id.into()),
            ..Self::default()
        }
    }

    /// Narrow the scope to a level
    pub fn with_level(mut self, level_id: impl Into<LevelId>) -> Self {
        self.level_id = Some(level_id.into());
        self
    }

    /// Narrow the scope to a task
    pub fn with_task(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Check a trigger scope against an event scope
    ///
    /// Every field declared on `self` must be present and equal on the event;
    /// undeclared fields match anything.
    pub fn matches(&self, event: &Scope) -> bool {
        fn field_matches<T: PartialEq>(declared: &Option<T>, actual: &Option<T>) -> bool {
            match declared {
                None => true,
                Some(expected) => actual.as_ref() == Some(expected),
            }
        }
        field_matches(&self.task_id, &event.task_id)
            && field_matches(&self.flow_id, &event.flow_id)
            && field_matches(&self.level_id, &event.level_id)
    }

    /// True when no field is declared
    pub fn is_unscoped(&self) -> bool {
        self.task_id.is_none() && self.flow_id.is_none() && self.level_id.is_none()
    }
}

/// An event delivered to the trigger dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Where the event happened
    #[serde(default)]
    pub scope: Scope,
    /// Runtime data the trigger conditions are evaluated against
    #[serde(default)]
    pub data: EventData,
    /// Identity used for duplicate suppression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    /// Flow instance that produced the event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<FlowInstanceId>,
    /// How many trigger -> flow hops led to this event
    #[serde(default)]
    pub cascade_depth: u32,
    /// When the event occurred
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Create an event with empty data
    pub fn new(event_type: EventType, scope: Scope) -> Self {
        Self {
            event_type,
            scope,
            data: EventData::new(),
            dedup_key: None,
            instance_id: None,
            cascade_depth: 0,
            occurred_at: Utc::now(),
        }
    }

    /// Attach event data
    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    /// Attach an explicit dedup key
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Attach the producing flow instance
    pub fn with_instance(mut self, instance_id: FlowInstanceId, cascade_depth: u32) -> Self {
        self.instance_id = Some(instance_id);
        self.cascade_depth = cascade_depth;
        self
    }

    /// Key used to detect duplicate deliveries
    ///
    /// Falls back to a canonical rendering of type, scope and data; JSON
    /// objects keep sorted keys so equal payloads give equal keys.
    pub fn effective_dedup_key(&self) -> String {
        if let Some(key) = &self.dedup_key {
            return key.clone();
        }
        let scope = serde_json::to_string(&self.scope).unwrap_or_default();
        let data = Value::Object(self.data.clone()).to_string();
        format!("{}|{}|{}", self.event_type, scope, data)
    }
}

/// Sending half of the domain event channel
///
/// The channel is unbounded so that a flow started from inside an action
/// worker can always publish without waiting on the dispatcher.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Option<mpsc::UnboundedSender<DomainEvent>>,
}

impl EventPublisher {
    /// Create a publisher and the receiver the dispatcher loop consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A publisher that drops every event
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Publish an event; returns false when nobody is listening
    pub fn publish(&self, event: DomainEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let event_type = event.event_type;
        match tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(event_type = %event_type, "event channel closed, event dropped");
                false
            }
        }
    }
}
