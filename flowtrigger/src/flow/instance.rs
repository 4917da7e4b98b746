//! Runtime state of a flow instance

use super::{FlowId, FlowInstanceId, LevelId, ResolvedBy};
use crate::events::EventData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status of a flow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Created but not yet positioned on a level
    NotStarted,
    /// Waiting for the current level to complete
    Running,
    /// Finished
    Completed,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstanceStatus::NotStarted => "NOT_STARTED",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Completed => "COMPLETED",
        };
        f.write_str(text)
    }
}

/// One visit of a level in the instance history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelVisit {
    /// Level visited
    pub level_id: LevelId,
    /// When the instance entered the level
    pub entered_at: DateTime<Utc>,
    /// When the level was completed
    pub completed_at: Option<DateTime<Utc>>,
    /// What routed the instance out of the level
    pub resolved_by: Option<ResolvedBy>,
}

/// A running or finished execution of a flow
///
/// Only [`FlowProgression`](super::FlowProgression) mutates instances;
/// callers receive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInstance {
    pub(crate) id: FlowInstanceId,
    pub(crate) flow_id: FlowId,
    pub(crate) current_level_id: Option<LevelId>,
    pub(crate) status: InstanceStatus,
    pub(crate) data: EventData,
    pub(crate) history: Vec<LevelVisit>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) cascade_depth: u32,
}

impl FlowInstance {
    pub(crate) fn new(flow_id: FlowId, data: EventData, cascade_depth: u32) -> Self {
        Self {
            id: FlowInstanceId::new(),
            flow_id,
            current_level_id: None,
            status: InstanceStatus::NotStarted,
            data,
            history: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            cascade_depth,
        }
    }

    /// Instance identifier
    pub fn id(&self) -> FlowInstanceId {
        self.id
    }

    /// Flow being executed
    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    /// Level awaiting completion, `None` once completed
    pub fn current_level_id(&self) -> Option<&LevelId> {
        self.current_level_id.as_ref()
    }

    /// Lifecycle status
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Accumulated level data
    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Levels visited so far, in order
    pub fn history(&self) -> &[LevelVisit] {
        &self.history
    }

    /// Creation time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Completion time
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Trigger -> flow hops that led to this instance
    pub fn cascade_depth(&self) -> u32 {
        self.cascade_depth
    }

    pub(crate) fn enter(&mut self, level_id: LevelId) {
        self.history.push(LevelVisit {
            level_id: level_id.clone(),
            entered_at: Utc::now(),
            completed_at: None,
            resolved_by: None,
        });
        self.current_level_id = Some(level_id);
        self.status = InstanceStatus::Running;
    }

    /// Merge submitted level data: top-level keys plus a `levels.<id>` snapshot
    pub(crate) fn merge_level_data(&mut self, level_id: &LevelId, level_data: EventData) {
        for (key, value) in &level_data {
            self.data.insert(key.clone(), value.clone());
        }
        let levels = self
            .data
            .entry("levels")
            .or_insert_with(|| Value::Object(EventData::new()));
        if !levels.is_object() {
            *levels = Value::Object(EventData::new());
        }
        if let Value::Object(levels) = levels {
            levels.insert(level_id.to_string(), Value::Object(level_data));
        }
    }

    pub(crate) fn leave_current(&mut self, resolved_by: ResolvedBy) {
        if let Some(visit) = self.history.last_mut() {
            visit.completed_at = Some(Utc::now());
            visit.resolved_by = Some(resolved_by);
        }
    }

    pub(crate) fn complete(&mut self) {
        self.current_level_id = None;
        self.status = InstanceStatus::Completed;
        self.completed_at = Some(Utc::now());
    }
}
