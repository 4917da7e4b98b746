//! Event to trigger dispatch

use super::{BusinessHours, RecentFires, Trigger, TriggerId};
use crate::action::{ActionContext, ActionExecutor, ActionJob, ActionPool};
use crate::condition::{evaluate_group, TraceNode};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{DomainEvent, EventData};
use crate::execution_log::{ExecutionId, ExecutionLog, ExecutionStatus, TriggerExecution};
use crate::storage::TriggerStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// What the dispatcher did with one trigger for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DispatchDecision {
    /// Conditions did not match
    NotMatched,
    /// Conditions matched outside the business hours window
    OutsideBusinessHours,
    /// Conditions matched but the dedup key already fired
    Duplicate,
    /// Actions were queued to run after `delay`
    Scheduled {
        /// Wait before the actions run
        delay: Duration,
    },
    /// The action pool no longer accepts work
    Rejected,
}

/// Result of a dry-run evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    /// Trigger evaluated
    pub trigger_id: TriggerId,
    /// Whether the conditions matched
    pub conditions_met: bool,
    /// Time spent evaluating
    pub evaluation_time_ms: f64,
    /// Condition trace
    pub trace: TraceNode,
}

/// Matches domain events against triggers and hands fired triggers to the action pool
pub struct TriggerDispatcher {
    triggers: Arc<dyn TriggerStore>,
    recent: RecentFires,
    business_hours: BusinessHours,
    log: ExecutionLog,
    pool: ActionPool,
}

impl std::fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerDispatcher")
            .field("recent", &self.recent)
            .field("business_hours", &self.business_hours)
            .field("pool", &self.pool)
            .finish()
    }
}

impl TriggerDispatcher {
    /// Assemble a dispatcher from its parts
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        log: ExecutionLog,
        pool: ActionPool,
        recent: RecentFires,
        business_hours: BusinessHours,
    ) -> Self {
        Self {
            triggers,
            recent,
            business_hours,
            log,
            pool,
        }
    }

    /// Create a dispatcher and its worker pool from the engine configuration
    pub fn from_config(
        triggers: Arc<dyn TriggerStore>,
        log: ExecutionLog,
        executor: Arc<ActionExecutor>,
        config: &EngineConfig,
    ) -> Self {
        let pool = ActionPool::start(
            executor,
            log.clone(),
            config.worker_count,
            config.queue_capacity,
        );
        Self::new(
            triggers,
            log,
            pool,
            RecentFires::new(config.dedup_capacity, config.dedup_ttl()),
            config.business_hours.clone(),
        )
    }

    /// Execution log the dispatcher writes to
    pub fn execution_log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Duplicate suppression cache
    pub fn recent_fires(&self) -> &RecentFires {
        &self.recent
    }

    /// Evaluate every active trigger listening for the event
    ///
    /// Conditions are evaluated and logged before this returns; actions run
    /// later on the worker pool.
    pub async fn on_event(&self, event: &DomainEvent) -> Vec<(TriggerId, DispatchDecision)> {
        self.dispatch_at(event, Utc::now()).await
    }

    async fn dispatch_at(
        &self,
        event: &DomainEvent,
        now: DateTime<Utc>,
    ) -> Vec<(TriggerId, DispatchDecision)> {
        let candidates = match self.triggers.triggers_for(event.event_type) {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!(event_type = %event.event_type, "failed to load triggers: {}", e);
                return Vec::new();
            }
        };

        let mut decisions = Vec::new();
        for trigger in candidates {
            if !trigger.scope.matches(&event.scope) {
                continue;
            }
            let decision = self.dispatch_one(&trigger, event, now).await;
            decisions.push((trigger.id.clone(), decision));
        }

        tracing::debug!(
            event_type = %event.event_type,
            triggers = decisions.len(),
            "event dispatched"
        );
        decisions
    }

    async fn dispatch_one(
        &self,
        trigger: &Trigger,
        event: &DomainEvent,
        now: DateTime<Utc>,
    ) -> DispatchDecision {
        let started = Instant::now();
        let outcome = evaluate_group(trigger.conditions.as_ref(), &event.data);

        let mut execution = TriggerExecution {
            id: ExecutionId::new(),
            trigger_id: trigger.id.clone(),
            event_type: event.event_type,
            event_data: event.data.clone(),
            conditions_met: outcome.matched,
            condition_trace: outcome.trace,
            dispatch_eligible: false,
            actions_executed: Vec::new(),
            status: ExecutionStatus::Skipped,
            error_message: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
            executed_at: now,
        };

        if !execution.conditions_met {
            tracing::debug!(trigger_id = %trigger.id, "conditions not met");
            self.record_skipped(trigger, execution, None);
            return DispatchDecision::NotMatched;
        }

        tracing::info!(
            trigger_id = %trigger.id,
            event_type = %event.event_type,
            "conditions met"
        );

        if trigger.settings.business_hours_only && !self.business_hours.contains(now) {
            tracing::info!(trigger_id = %trigger.id, "outside business hours, not dispatched");
            self.record_skipped(trigger, execution, Some("outside business hours"));
            return DispatchDecision::OutsideBusinessHours;
        }

        if trigger.settings.prevent_duplicates {
            let key = event.effective_dedup_key();
            if !self.recent.check_and_record(&trigger.id, &key) {
                tracing::warn!(trigger_id = %trigger.id, dedup_key = %key, "duplicate fire suppressed");
                self.record_skipped(trigger, execution, Some("duplicate suppressed"));
                return DispatchDecision::Duplicate;
            }
        }

        execution.dispatch_eligible = true;
        let delay = Duration::from_secs(trigger.settings.delay_execution_sec);

        // The match is logged now; the delayed outcome gets a record of its own.
        let pending = (!delay.is_zero()).then(|| {
            let mut pending = execution.clone();
            pending.status = ExecutionStatus::Scheduled;
            execution.id = ExecutionId::new();
            pending
        });

        let job = ActionJob {
            actions: trigger.actions.clone(),
            context: ActionContext {
                trigger_id: trigger.id.clone(),
                event_type: event.event_type,
                event_data: event.data.clone(),
                scope: event.scope.clone(),
                instance_id: event.instance_id,
                cascade_depth: event.cascade_depth,
            },
            execution,
            delay,
            done: None,
        };

        match self.pool.submit(job).await {
            Ok(()) => {
                if let Some(pending) = &pending {
                    self.append(pending);
                }
                tracing::info!(trigger_id = %trigger.id, ?delay, "trigger fired");
                DispatchDecision::Scheduled { delay }
            }
            Err(job) => {
                tracing::error!(trigger_id = %trigger.id, "action pool closed, trigger not executed");
                let mut execution = job.execution;
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some("action pool closed".to_string());
                self.append(&execution);
                DispatchDecision::Rejected
            }
        }
    }

    fn record_skipped(&self, trigger: &Trigger, mut execution: TriggerExecution, reason: Option<&str>) {
        if !trigger.settings.logging {
            return;
        }
        execution.status = ExecutionStatus::Skipped;
        execution.error_message = reason.map(str::to_string);
        self.append(&execution);
    }

    fn append(&self, execution: &TriggerExecution) {
        if let Err(e) = self.log.append(execution) {
            tracing::error!(trigger_id = %execution.trigger_id, "failed to record execution: {}", e);
        }
    }

    /// Evaluate a stored trigger against sample data without gating or actions
    pub fn test_trigger(&self, trigger_id: &TriggerId, sample: &EventData) -> Result<TestReport> {
        let trigger = self.triggers.get_trigger(trigger_id)?;
        Ok(Self::test_definition(&trigger, sample))
    }

    /// Evaluate a trigger definition, saved or not, against sample data
    pub fn test_definition(trigger: &Trigger, sample: &EventData) -> TestReport {
        let started = Instant::now();
        let outcome = evaluate_group(trigger.conditions.as_ref(), sample);
        TestReport {
            trigger_id: trigger.id.clone(),
            conditions_met: outcome.matched,
            evaluation_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            trace: outcome.trace,
        }
    }

    /// Consume events until cancelled, then drain what is already queued
    pub async fn run(&self, mut events: UnboundedReceiver<DomainEvent>, cancel: CancellationToken) {
        tracing::info!("trigger dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.on_event(&event).await;
                    }
                    None => break,
                },
            }
        }

        events.close();
        while let Some(event) = events.recv().await {
            self.on_event(&event).await;
        }
        tracing::info!("trigger dispatcher stopped");
    }

    /// Stop the worker pool after queued actions finish
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
