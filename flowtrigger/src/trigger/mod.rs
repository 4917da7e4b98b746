//! Trigger definitions and dispatch
//!
//! A [`Trigger`] listens for one event type within a [`Scope`], evaluates its
//! condition tree against the event data and, when it fires, runs its
//! actions through the action pool.

mod business_hours;
mod dedup;
mod dispatcher;

pub use business_hours::BusinessHours;
pub use dedup::RecentFires;
pub use dispatcher::{DispatchDecision, TestReport, TriggerDispatcher};

use crate::action::Action;
use crate::common::ids::string_id;
use crate::condition::ConditionGroup;
use crate::events::{EventType, Scope};
use crate::validation::{Validatable, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

string_id!(
    /// Identifier of a trigger
    TriggerId,
    "Trigger ID"
);

fn default_logging() -> bool {
    true
}

/// Dispatch behaviour of a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    /// Seconds to wait between firing and running the actions
    pub delay_execution_sec: u64,
    /// Fire at most once per dedup key
    pub prevent_duplicates: bool,
    /// Only dispatch inside the configured business hours
    pub business_hours_only: bool,
    /// Record non-firing evaluations in the execution log
    #[serde(default = "default_logging")]
    pub logging: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            delay_execution_sec: 0,
            prevent_duplicates: false,
            business_hours_only: false,
            logging: true,
        }
    }
}

/// An event-driven automation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger identifier
    pub id: TriggerId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Event type the trigger listens for
    pub event_type: EventType,
    /// Where the event must come from
    #[serde(default)]
    pub scope: Scope,
    /// Conditions on the event data; `None` always matches
    #[serde(default)]
    pub conditions: Option<ConditionGroup>,
    /// Actions run in order when the trigger fires
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Inactive triggers never match
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Dispatch behaviour
    #[serde(default)]
    pub settings: TriggerSettings,
}

fn default_active() -> bool {
    true
}

impl Trigger {
    /// Create an active, unscoped trigger without conditions or actions
    pub fn new(id: impl Into<TriggerId>, name: impl Into<String>, event_type: EventType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            event_type,
            scope: Scope::any(),
            conditions: None,
            actions: Vec::new(),
            is_active: true,
            settings: TriggerSettings::default(),
        }
    }

    /// Set the scope
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set the conditions
    pub fn with_conditions(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Append an action
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: TriggerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Activate the trigger; it must carry at least one action
    pub fn activate(&mut self) -> ValidationResult<()> {
        self.validate()?;
        self.is_active = true;
        Ok(())
    }

    /// Stop matching new events
    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

impl Validatable for Trigger {
    fn validate(&self) -> ValidationResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(crate::common::IdError::Empty { kind: "Trigger ID" }.into());
        }
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions(self.id.to_string()));
        }
        if let Some(conditions) = &self.conditions {
            conditions.validate()?;
        }
        Ok(())
    }
}
