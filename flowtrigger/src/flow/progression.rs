//! The flow progression state machine
//!
//! Instances move NOT_STARTED -> RUNNING -> COMPLETED. Every mutation of an
//! instance happens while holding that instance's lock, so concurrent
//! completions of the same level are serialized and all but one fail with a
//! conflict error.

use super::{
    BranchResolver, Flow, FlowError, FlowId, FlowInstance, FlowInstanceId, InstanceStatus, Level,
    LevelId, NextLevel, Resolution,
};
use crate::events::{DomainEvent, EventData, EventPublisher, EventType, Scope};
use crate::storage::FlowStore;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of completing a level
#[derive(Debug, Clone, Serialize)]
pub struct LevelTransition {
    /// Level that was completed
    pub completed_level: LevelId,
    /// How the next level was chosen
    pub resolution: Resolution,
    /// Instance state after the transition
    pub instance: FlowInstance,
}

struct InstanceSlot {
    // Published flows are frozen, so the definition an instance started on is pinned here.
    flow: Arc<Flow>,
    state: Mutex<FlowInstance>,
}

/// Owns running flow instances and advances them level by level
pub struct FlowProgression {
    flows: Arc<dyn FlowStore>,
    instances: DashMap<FlowInstanceId, Arc<InstanceSlot>>,
    events: EventPublisher,
}

impl std::fmt::Debug for FlowProgression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowProgression")
            .field("instances", &self.instances.len())
            .finish()
    }
}

impl FlowProgression {
    /// Create a state machine reading flows from `flows` and emitting on `events`
    pub fn new(flows: Arc<dyn FlowStore>, events: EventPublisher) -> Self {
        Self {
            flows,
            instances: DashMap::new(),
            events,
        }
    }

    /// Start an instance of a published flow with empty data
    pub async fn start(&self, flow_id: &FlowId) -> Result<FlowInstance, FlowError> {
        self.start_with(flow_id, EventData::new(), 0).await
    }

    /// Start an instance with initial data at a given cascade depth
    pub async fn start_with(
        &self,
        flow_id: &FlowId,
        data: EventData,
        cascade_depth: u32,
    ) -> Result<FlowInstance, FlowError> {
        let flow = self.flows.get_flow(flow_id)?;
        if !flow.is_published() {
            return Err(FlowError::NotPublished(flow_id.clone()));
        }
        let first = flow
            .first_level()
            .ok_or_else(|| crate::validation::ValidationError::EmptyFlow(flow_id.to_string()))?;

        let mut instance = FlowInstance::new(flow_id.clone(), data, cascade_depth);
        instance.enter(first.id.clone());

        let snapshot = instance.clone();
        tracing::info!(
            flow_id = %flow_id,
            instance_id = %instance.id,
            level_id = %first.id,
            cascade_depth,
            "flow instance started"
        );

        self.emit(
            &snapshot,
            EventType::FlowStarted,
            Scope::flow(flow_id.clone()).with_level(first.id.clone()),
            format!("{}:flow_started", snapshot.id),
        );
        self.emit_level_tasks(&snapshot, first, EventType::TaskStarted, "started");

        self.instances.insert(
            instance.id,
            Arc::new(InstanceSlot {
                flow,
                state: Mutex::new(instance),
            }),
        );
        Ok(snapshot)
    }

    /// Complete the current level of an instance and advance it
    ///
    /// Fails with [`FlowError::InstanceCompleted`] when the instance already
    /// finished and [`FlowError::LevelMismatch`] when `level_id` is not the
    /// current level, which also covers completing the same level twice.
    pub async fn complete_level(
        &self,
        instance_id: FlowInstanceId,
        level_id: &LevelId,
        level_data: EventData,
    ) -> Result<LevelTransition, FlowError> {
        let slot = self
            .instances
            .get(&instance_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(FlowError::InstanceNotFound(instance_id))?;

        let mut instance = slot.state.lock().await;
        if instance.status == InstanceStatus::Completed {
            return Err(FlowError::InstanceCompleted(instance_id));
        }
        if instance.current_level_id.as_ref() != Some(level_id) {
            return Err(FlowError::LevelMismatch {
                instance: instance_id,
                expected: instance.current_level_id.clone(),
                actual: level_id.clone(),
            });
        }

        let flow = &slot.flow;
        let completed = flow
            .level(level_id)
            .ok_or_else(|| FlowError::LevelNotFound(level_id.clone()))?;

        instance.merge_level_data(level_id, level_data);
        let resolution = BranchResolver::new(flow).resolve_next(level_id, &instance.data)?;
        instance.leave_current(resolution.via.clone());

        let next_level = match &resolution.next {
            NextLevel::Level(next_id) => Some(
                flow.level(next_id)
                    .ok_or_else(|| FlowError::LevelNotFound(next_id.clone()))?,
            ),
            NextLevel::Complete => None,
        };
        match next_level {
            Some(next) => instance.enter(next.id.clone()),
            None => instance.complete(),
        }

        let snapshot = instance.clone();
        tracing::info!(
            flow_id = %snapshot.flow_id,
            instance_id = %instance_id,
            completed = %level_id,
            next = ?resolution.next,
            via = ?resolution.via,
            "level completed"
        );

        self.emit_level_tasks(&snapshot, completed, EventType::TaskCompleted, "completed");
        match next_level {
            Some(next) => {
                self.emit_level_tasks(&snapshot, next, EventType::TaskStarted, "started");
            }
            None => {
                tracing::info!(
                    flow_id = %snapshot.flow_id,
                    instance_id = %instance_id,
                    "flow instance completed"
                );
                self.emit(
                    &snapshot,
                    EventType::FlowCompleted,
                    Scope::flow(snapshot.flow_id.clone()),
                    format!("{}:flow_completed", instance_id),
                );
            }
        }

        Ok(LevelTransition {
            completed_level: level_id.clone(),
            resolution,
            instance: snapshot,
        })
    }

    /// Snapshot of an instance
    pub async fn get(&self, instance_id: FlowInstanceId) -> Option<FlowInstance> {
        let slot = self
            .instances
            .get(&instance_id)
            .map(|entry| Arc::clone(entry.value()))?;
        let instance = slot.state.lock().await;
        Some(instance.clone())
    }

    /// Number of tracked instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Forget completed instances, returning how many were removed
    ///
    /// Instances that are locked at the time of the call are kept.
    pub fn prune_completed(&self) -> usize {
        let before = self.instances.len();
        self.instances.retain(|_, slot| match slot.state.try_lock() {
            Ok(instance) => instance.status != InstanceStatus::Completed,
            Err(_) => true,
        });
        before - self.instances.len()
    }

    /// Emit one event per task of a level, or one level-scoped event for a level without tasks
    fn emit_level_tasks(
        &self,
        instance: &FlowInstance,
        level: &Level,
        event_type: EventType,
        suffix: &str,
    ) {
        let base = Scope::flow(instance.flow_id.clone()).with_level(level.id.clone());
        if level.tasks.is_empty() {
            self.emit(
                instance,
                event_type,
                base,
                format!("{}:{}:{}", instance.id, level.id, suffix),
            );
            return;
        }
        for task in &level.tasks {
            self.emit(
                instance,
                event_type,
                base.clone().with_task(task.task_id.clone()),
                format!("{}:{}:{}:{}", instance.id, level.id, task.task_id, suffix),
            );
        }
    }

    fn emit(&self, instance: &FlowInstance, event_type: EventType, scope: Scope, key: String) {
        let event = DomainEvent::new(event_type, scope)
            .with_data(instance.data.clone())
            .with_dedup_key(key)
            .with_instance(instance.id, instance.cascade_depth);
        self.events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{Branch, LevelTask, ResolvedBy};
    use crate::storage::MemoryFlowStore;
    use crate::test_utils::{data, drain_events};
    use serde_json::json;

    fn approval_flow() -> Flow {
        let mut flow = Flow::new("approval", "Approval");
        flow.add_level(Level::new("a", 1).with_task(LevelTask::new("request", 0)))
            .unwrap();
        flow.add_level(Level::new("b", 2).with_task(LevelTask::new("manager_review", 0)))
            .unwrap();
        flow.add_level(Level::new("c", 3)).unwrap();
        flow
    }

    fn progression(flow: Flow) -> (FlowProgression, tokio::sync::mpsc::UnboundedReceiver<DomainEvent>) {
        let store = Arc::new(MemoryFlowStore::new());
        store.store_flow(flow);
        let (publisher, rx) = EventPublisher::channel();
        (FlowProgression::new(store, publisher), rx)
    }

    #[tokio::test]
    async fn test_start_requires_published_flow() {
        let (machine, _rx) = progression(approval_flow());
        assert!(matches!(
            machine.start(&FlowId::from("approval")).await,
            Err(FlowError::NotPublished(_))
        ));
        assert!(matches!(
            machine.start(&FlowId::from("missing")).await,
            Err(FlowError::FlowNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sequential_progression_emits_events() {
        let mut flow = approval_flow();
        flow.publish().unwrap();
        let (machine, mut rx) = progression(flow);

        let instance = machine.start(&FlowId::from("approval")).await.unwrap();
        assert_eq!(instance.status(), InstanceStatus::Running);
        assert_eq!(instance.current_level_id(), Some(&LevelId::from("a")));

        let events = drain_events(&mut rx);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::FlowStarted, EventType::TaskStarted]);
        assert_eq!(events[1].scope.task_id, Some("request".into()));

        let step = machine
            .complete_level(instance.id(), &LevelId::from("a"), data(json!({"amount": 5})))
            .await
            .unwrap();
        assert_eq!(step.resolution.via, ResolvedBy::Sequential);
        assert_eq!(step.instance.current_level_id(), Some(&LevelId::from("b")));

        let events = drain_events(&mut rx);
        assert_eq!(events[0].event_type, EventType::TaskCompleted);
        assert_eq!(events[0].data["amount"], json!(5));
        assert_eq!(events[0].dedup_key.as_deref(), Some(format!("{}:a:request:completed", instance.id()).as_str()));
        assert_eq!(events[1].event_type, EventType::TaskStarted);
        assert_eq!(events[1].scope.task_id, Some("manager_review".into()));

        machine
            .complete_level(instance.id(), &LevelId::from("b"), EventData::new())
            .await
            .unwrap();
        let last = machine
            .complete_level(instance.id(), &LevelId::from("c"), EventData::new())
            .await
            .unwrap();
        assert_eq!(last.instance.status(), InstanceStatus::Completed);
        assert_eq!(last.resolution.next, NextLevel::Complete);

        let types: Vec<_> = drain_events(&mut rx).iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::TaskCompleted,
                EventType::TaskStarted,
                EventType::TaskCompleted,
                EventType::FlowCompleted
            ]
        );
    }

    #[tokio::test]
    async fn test_branch_skips_level() {
        let mut flow = approval_flow();
        flow.add_branch(Branch::new("big", "a", "c", 0).when(crate::test_utils::amount_over(1000)))
            .unwrap();
        flow.publish().unwrap();
        let (machine, _rx) = progression(flow);

        let instance = machine.start(&FlowId::from("approval")).await.unwrap();
        let step = machine
            .complete_level(instance.id(), &LevelId::from("a"), data(json!({"amount": 5000})))
            .await
            .unwrap();
        assert_eq!(step.instance.current_level_id(), Some(&LevelId::from("c")));
        let visited: Vec<_> = step
            .instance
            .history()
            .iter()
            .map(|v| v.level_id.as_str().to_string())
            .collect();
        assert_eq!(visited, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_level_mismatch_and_completed_errors() {
        let mut flow = approval_flow();
        flow.publish().unwrap();
        let (machine, _rx) = progression(flow);
        let instance = machine.start(&FlowId::from("approval")).await.unwrap();
        let id = instance.id();

        let err = machine
            .complete_level(id, &LevelId::from("b"), EventData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::LevelMismatch { .. }));
        assert!(err.is_conflict());

        machine.complete_level(id, &LevelId::from("a"), EventData::new()).await.unwrap();
        let again = machine
            .complete_level(id, &LevelId::from("a"), EventData::new())
            .await
            .unwrap_err();
        assert!(matches!(again, FlowError::LevelMismatch { .. }));

        machine.complete_level(id, &LevelId::from("b"), EventData::new()).await.unwrap();
        machine.complete_level(id, &LevelId::from("c"), EventData::new()).await.unwrap();
        assert!(matches!(
            machine.complete_level(id, &LevelId::from("c"), EventData::new()).await,
            Err(FlowError::InstanceCompleted(_))
        ));

        assert!(matches!(
            machine
                .complete_level(FlowInstanceId::new(), &LevelId::from("a"), EventData::new())
                .await,
            Err(FlowError::InstanceNotFound(_))
        ));
        assert_eq!(machine.prune_completed(), 1);
        assert!(machine.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_level_without_tasks_emits_level_scoped_event() {
        let mut flow = Flow::new("solo", "Solo");
        flow.add_level(Level::new("only", 1)).unwrap();
        flow.publish().unwrap();
        let (machine, mut rx) = progression(flow);

        let instance = machine.start(&FlowId::from("solo")).await.unwrap();
        machine
            .complete_level(instance.id(), &LevelId::from("only"), EventData::new())
            .await
            .unwrap();
        let events = drain_events(&mut rx);
        let completed = events
            .iter()
            .find(|e| e.event_type == EventType::TaskCompleted)
            .unwrap();
        assert_eq!(completed.scope.level_id, Some(LevelId::from("only")));
        assert!(completed.scope.task_id.is_none());
        assert_eq!(events.last().unwrap().event_type, EventType::FlowCompleted);
    }
}
