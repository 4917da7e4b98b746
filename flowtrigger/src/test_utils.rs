//! Fixtures shared by unit and integration tests
//!
//! Senders here record or fail on purpose so tests can observe what the
//! action executor and worker pool did without any transport.

use crate::action::{Action, ActionContext, ActionError, ActionSender, ActionType};
use crate::condition::{Condition, ConditionGroup, Operator, TraceNode};
use crate::events::{DomainEvent, EventData, EventType, Scope};
use crate::execution_log::{ExecutionId, ExecutionStatus, TriggerExecution};
use crate::trigger::{Trigger, TriggerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Turn a JSON object literal into event data; anything else gives empty data
pub fn data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => EventData::new(),
    }
}

/// Everything currently buffered on an event channel
pub fn drain_events(rx: &mut UnboundedReceiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// `amount > limit`
pub fn amount_over(limit: i64) -> ConditionGroup {
    let condition = Condition::new("amount", Operator::GreaterThan, Some(json!(limit)))
        .expect("amount condition is valid");
    ConditionGroup::and(vec![condition.into()])
}

/// Active TASK_COMPLETED trigger on `task` sending one email
pub fn email_trigger(id: &str, task: &str) -> Trigger {
    Trigger::new(id, format!("{id} email"), EventType::TaskCompleted)
        .with_scope(Scope::task(task))
        .with_action(Action::new(
            ActionType::Email,
            json!({"to": "ops@example.com", "subject": "Task completed"}),
        ))
}

/// Skipped execution record for `trigger_id` executed at `executed_at`
pub fn execution_record(trigger_id: &str, executed_at: DateTime<Utc>) -> TriggerExecution {
    TriggerExecution {
        id: ExecutionId::new(),
        trigger_id: TriggerId::from(trigger_id),
        event_type: EventType::TaskCompleted,
        event_data: data(json!({"amount": 1})),
        conditions_met: true,
        condition_trace: TraceNode::Always,
        dispatch_eligible: true,
        actions_executed: Vec::new(),
        status: ExecutionStatus::Skipped,
        error_message: None,
        execution_time_ms: 0,
        executed_at,
    }
}

/// Context of a TASK_COMPLETED fire at depth 0
pub fn context() -> ActionContext {
    ActionContext {
        trigger_id: TriggerId::from("test-trigger"),
        event_type: EventType::TaskCompleted,
        event_data: data(json!({"status": "COMPLETED"})),
        scope: Scope::task("invoice"),
        instance_id: None,
        cascade_depth: 0,
    }
}

/// Sender that succeeds and remembers every config it was given
#[derive(Debug, Default)]
pub struct RecordingSender {
    calls: Mutex<Vec<Value>>,
}

impl RecordingSender {
    /// Create a sender with no recorded calls
    pub fn new() -> Self {
        Self::default()
    }

    /// Configs received so far, in call order
    pub fn calls(&self) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ActionSender for RecordingSender {
    async fn send(&self, config: &Value, _context: &ActionContext) -> Result<Value, ActionError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(config.clone());
        Ok(json!({"sent": true}))
    }
}

/// Sender that fails a set number of times
#[derive(Debug)]
pub struct FailingSender {
    failures: u32,
    retryable: bool,
    attempts: AtomicU32,
}

impl FailingSender {
    /// Fail with a retryable error `failures` times, then succeed
    pub fn retryable(failures: u32) -> Self {
        Self {
            failures,
            retryable: true,
            attempts: AtomicU32::new(0),
        }
    }

    /// Always fail with a terminal error
    pub fn terminal() -> Self {
        Self {
            failures: u32::MAX,
            retryable: false,
            attempts: AtomicU32::new(0),
        }
    }

    /// Calls received so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionSender for FailingSender {
    async fn send(&self, _config: &Value, _context: &ActionContext) -> Result<Value, ActionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(if self.retryable {
                ActionError::Retryable(format!("service unavailable (attempt {attempt})"))
            } else {
                ActionError::Terminal("rejected".to_string())
            });
        }
        Ok(json!({"attempt": attempt}))
    }
}

/// Sender that takes the given time before succeeding
#[derive(Debug, Clone, Copy)]
pub struct SlowSender(pub Duration);

#[async_trait]
impl ActionSender for SlowSender {
    async fn send(&self, _config: &Value, _context: &ActionContext) -> Result<Value, ActionError> {
        tokio::time::sleep(self.0).await;
        Ok(Value::Null)
    }
}

/// Poll `check` until it holds or `limit` passes; returns the last result
pub async fn wait_until<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
