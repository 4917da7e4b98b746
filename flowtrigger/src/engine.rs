//! Wiring of stores, state machine, dispatcher and action pool
//!
//! ```rust,no_run
//! use flowtrigger::prelude::*;
//! use flowtrigger::storage::{MemoryFlowStore, MemoryTriggerStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> flowtrigger::Result<()> {
//! let flows = Arc::new(MemoryFlowStore::new());
//! let triggers = Arc::new(MemoryTriggerStore::new());
//! let engine = EngineBuilder::new()
//!     .config(EngineConfig::new())
//!     .flow_store(flows)
//!     .trigger_store(triggers)
//!     .build()?;
//!
//! let instance = engine.start_flow(&FlowId::from("approval")).await?;
//! println!("started {}", instance.id());
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::action::{ActionExecutor, ActionSender, ActionType, FlowSender};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{DomainEvent, EventData, EventPublisher};
use crate::execution_log::ExecutionLog;
use crate::flow::{FlowId, FlowInstance, FlowInstanceId, FlowProgression, LevelId, LevelTransition};
use crate::storage::{FlowStore, MemoryFlowStore, MemoryTriggerStore, TriggerStore};
use crate::trigger::{TestReport, TriggerDispatcher, TriggerId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    flow_store: Option<Arc<dyn FlowStore>>,
    trigger_store: Option<Arc<dyn TriggerStore>>,
    execution_log: Option<ExecutionLog>,
    senders: Vec<(ActionType, Arc<dyn ActionSender>)>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let senders: Vec<_> = self.senders.iter().map(|(t, _)| t.to_string()).collect();
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("senders", &senders)
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Start with defaults and in-memory stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration instead of [`EngineConfig::default`]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Read flow definitions from this store
    pub fn flow_store(mut self, store: Arc<dyn FlowStore>) -> Self {
        self.flow_store = Some(store);
        self
    }

    /// Read trigger definitions from this store
    pub fn trigger_store(mut self, store: Arc<dyn TriggerStore>) -> Self {
        self.trigger_store = Some(store);
        self
    }

    /// Record executions here instead of the configured log
    pub fn execution_log(mut self, log: ExecutionLog) -> Self {
        self.execution_log = Some(log);
        self
    }

    /// Register a sender; a `flow` sender replaces the built-in one
    pub fn sender(mut self, action_type: ActionType, sender: Arc<dyn ActionSender>) -> Self {
        self.senders.push((action_type, sender));
        self
    }

    /// Validate the configuration and start the dispatcher loop
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Engine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let execution_log = match (self.execution_log, &config.execution_log_dir) {
            (Some(log), _) => log,
            (None, Some(dir)) => ExecutionLog::file_system(dir)?,
            (None, None) => ExecutionLog::memory(),
        };
        let flows = self
            .flow_store
            .unwrap_or_else(|| Arc::new(MemoryFlowStore::new()));
        let triggers = self
            .trigger_store
            .unwrap_or_else(|| Arc::new(MemoryTriggerStore::new()));

        let (publisher, events) = EventPublisher::channel();
        let progression = Arc::new(FlowProgression::new(flows, publisher.clone()));

        let mut executor = ActionExecutor::from_config(&config);
        executor.register(
            ActionType::Flow,
            Arc::new(FlowSender::new(
                Arc::clone(&progression),
                config.max_cascade_depth,
            )),
        );
        for (action_type, sender) in self.senders {
            executor.register(action_type, sender);
        }
        tracing::debug!(?executor, "action executor ready");

        let dispatcher = Arc::new(TriggerDispatcher::from_config(
            triggers,
            execution_log.clone(),
            Arc::new(executor),
            &config,
        ));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            let cancel = cancel.clone();
            async move { dispatcher.run(events, cancel).await }
        });

        let pruner = config
            .prune_interval()
            .map(|every| spawn_pruner(Arc::clone(&progression), every, cancel.clone()));

        tracing::info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            "engine started"
        );

        Ok(Engine {
            config,
            progression,
            dispatcher,
            execution_log,
            publisher,
            cancel,
            dispatcher_task: Mutex::new(Some(handle)),
            pruner_task: Mutex::new(pruner),
        })
    }
}

/// A running engine
pub struct Engine {
    config: EngineConfig,
    progression: Arc<FlowProgression>,
    dispatcher: Arc<TriggerDispatcher>,
    execution_log: ExecutionLog,
    publisher: EventPublisher,
    cancel: CancellationToken,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    pruner_task: Mutex<Option<JoinHandle<()>>>,
}

/// Forget completed instances every `every` until cancelled
fn spawn_pruner(
    progression: Arc<FlowProgression>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = progression.prune_completed();
                    if removed > 0 {
                        tracing::debug!(removed, "completed flow instances pruned");
                    }
                }
            }
        }
    })
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("progression", &self.progression)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Shorthand for [`EngineBuilder::new`]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The flow state machine
    pub fn progression(&self) -> &Arc<FlowProgression> {
        &self.progression
    }

    /// The trigger dispatcher
    pub fn dispatcher(&self) -> &Arc<TriggerDispatcher> {
        &self.dispatcher
    }

    /// The execution log
    pub fn execution_log(&self) -> &ExecutionLog {
        &self.execution_log
    }

    /// Inject an external event; returns false once the engine is shut down
    pub fn publish_event(&self, event: DomainEvent) -> bool {
        self.publisher.publish(event)
    }

    /// Start an instance of a published flow
    pub async fn start_flow(&self, flow_id: &FlowId) -> Result<FlowInstance> {
        Ok(self.progression.start(flow_id).await?)
    }

    /// Complete the current level of an instance
    pub async fn complete_level(
        &self,
        instance_id: FlowInstanceId,
        level_id: &LevelId,
        level_data: EventData,
    ) -> Result<LevelTransition> {
        Ok(self
            .progression
            .complete_level(instance_id, level_id, level_data)
            .await?)
    }

    /// Dry-run a stored trigger against sample data
    pub fn test_trigger(&self, trigger_id: &TriggerId, sample: &EventData) -> Result<TestReport> {
        self.dispatcher.test_trigger(trigger_id, sample)
    }

    /// Stop the dispatcher after queued events, then drain the action pool
    ///
    /// Events produced by actions that run during the drain are dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .dispatcher_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("dispatcher task failed: {}", e);
            }
        }
        self.dispatcher.shutdown().await;

        let pruner = self
            .pruner_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pruner) = pruner {
            if let Err(e) = pruner.await {
                tracing::error!("instance pruner failed: {}", e);
            }
        }
        tracing::info!("engine stopped");
    }
}
