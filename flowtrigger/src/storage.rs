//! Storage abstractions for flow and trigger definitions
//!
//! The engine only reads definitions; editing happens in the builder. The
//! traits are synchronous and the in-memory implementations back tests, the
//! CLI and embedders that keep definitions in their own database.

use crate::events::EventType;
use crate::flow::{Flow, FlowError, FlowId};
use crate::trigger::{Trigger, TriggerId};
use crate::validation::{Validatable, ValidationError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by definition stores
#[derive(Debug, Error)]
pub enum StorageError {
    /// No flow with that id
    #[error("Flow '{0}' not found")]
    FlowNotFound(FlowId),

    /// No trigger with that id
    #[error("Trigger '{0}' not found")]
    TriggerNotFound(TriggerId),

    /// A definition file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A definition file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A stored definition is invalid
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Any other backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Read access to flow definitions
pub trait FlowStore: Send + Sync {
    /// Get a flow by id
    fn get_flow(&self, id: &FlowId) -> Result<Arc<Flow>, StorageError>;

    /// List all flows
    fn list_flows(&self) -> Result<Vec<Arc<Flow>>, StorageError>;
}

/// Read access to trigger definitions
pub trait TriggerStore: Send + Sync {
    /// Get a trigger by id
    fn get_trigger(&self, id: &TriggerId) -> Result<Arc<Trigger>, StorageError>;

    /// List all triggers
    fn list_triggers(&self) -> Result<Vec<Arc<Trigger>>, StorageError>;

    /// Active triggers listening for an event type
    fn triggers_for(&self, event_type: EventType) -> Result<Vec<Arc<Trigger>>, StorageError> {
        Ok(self
            .list_triggers()?
            .into_iter()
            .filter(|t| t.is_active && t.event_type == event_type)
            .collect())
    }
}

/// In-memory flow store
#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    flows: DashMap<FlowId, Arc<Flow>>,
}

impl MemoryFlowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a flow
    pub fn store_flow(&self, flow: Flow) {
        self.flows.insert(flow.id().clone(), Arc::new(flow));
    }

    /// Apply a change to a stored flow
    ///
    /// The change runs on a copy; the stored flow is replaced only when the
    /// closure succeeds. Running instances keep the version they started on.
    pub fn update_flow<F>(&self, id: &FlowId, change: F) -> Result<(), FlowError>
    where
        F: FnOnce(&mut Flow) -> Result<(), FlowError>,
    {
        let mut entry = self
            .flows
            .get_mut(id)
            .ok_or_else(|| FlowError::FlowNotFound(id.clone()))?;
        let mut flow = Flow::clone(entry.value());
        change(&mut flow)?;
        *entry.value_mut() = Arc::new(flow);
        Ok(())
    }

    /// Remove a flow
    pub fn remove_flow(&self, id: &FlowId) -> Option<Arc<Flow>> {
        self.flows.remove(id).map(|(_, flow)| flow)
    }
}

impl FlowStore for MemoryFlowStore {
    fn get_flow(&self, id: &FlowId) -> Result<Arc<Flow>, StorageError> {
        self.flows
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::FlowNotFound(id.clone()))
    }

    fn list_flows(&self) -> Result<Vec<Arc<Flow>>, StorageError> {
        let mut flows: Vec<_> = self.flows.iter().map(|e| Arc::clone(e.value())).collect();
        flows.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(flows)
    }
}

/// In-memory trigger store
#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    triggers: DashMap<TriggerId, Arc<Trigger>>,
}

impl MemoryTriggerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert or replace a trigger
    pub fn store_trigger(&self, trigger: Trigger) -> Result<(), StorageError> {
        trigger.validate()?;
        self.triggers.insert(trigger.id.clone(), Arc::new(trigger));
        Ok(())
    }

    /// Activate or deactivate a trigger
    ///
    /// Work already dispatched for the trigger is not cancelled.
    pub fn set_active(&self, id: &TriggerId, active: bool) -> Result<(), StorageError> {
        let mut entry = self
            .triggers
            .get_mut(id)
            .ok_or_else(|| StorageError::TriggerNotFound(id.clone()))?;
        let mut trigger = Trigger::clone(entry.value());
        if active {
            trigger.activate()?;
        } else {
            trigger.deactivate();
        }
        *entry.value_mut() = Arc::new(trigger);
        Ok(())
    }

    /// Remove a trigger
    pub fn remove_trigger(&self, id: &TriggerId) -> Option<Arc<Trigger>> {
        self.triggers.remove(id).map(|(_, trigger)| trigger)
    }
}

impl TriggerStore for MemoryTriggerStore {
    fn get_trigger(&self, id: &TriggerId) -> Result<Arc<Trigger>, StorageError> {
        self.triggers
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::TriggerNotFound(id.clone()))
    }

    fn list_triggers(&self) -> Result<Vec<Arc<Trigger>>, StorageError> {
        let mut triggers: Vec<_> = self
            .triggers
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        triggers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(triggers)
    }
}

fn load_definition<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let content = std::fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| StorageError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load a flow definition from a `.yaml`, `.yml` or `.json` file
pub fn load_flow_file(path: impl AsRef<Path>) -> Result<Flow, StorageError> {
    let path = path.as_ref();
    let flow: Flow = load_definition(path)?;
    tracing::debug!(flow_id = %flow.id(), "loaded flow from {:?}", path);
    Ok(flow)
}

/// Load and validate a trigger definition from a `.yaml`, `.yml` or `.json` file
pub fn load_trigger_file(path: impl AsRef<Path>) -> Result<Trigger, StorageError> {
    let path = path.as_ref();
    let trigger: Trigger = load_definition(path)?;
    trigger.validate()?;
    tracing::debug!(trigger_id = %trigger.id, "loaded trigger from {:?}", path);
    Ok(trigger)
}
