//! Built-in action senders

use super::{ActionContext, ActionError, ActionSender};
use crate::events::EventData;
use crate::flow::{FlowError, FlowId, FlowProgression};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Starts a flow instance for `flow` actions
///
/// Config: `{"flow_id": "...", "data": {...}}` (`flowId` is accepted too).
/// The new instance starts with the event data overlaid by `data`, one
/// cascade level deeper than the event that fired the trigger.
#[derive(Debug, Clone)]
pub struct FlowSender {
    progression: Arc<FlowProgression>,
    max_cascade_depth: u32,
}

impl FlowSender {
    /// Create a sender starting flows on `progression`
    pub fn new(progression: Arc<FlowProgression>, max_cascade_depth: u32) -> Self {
        Self {
            progression,
            max_cascade_depth,
        }
    }

    fn flow_id(config: &Value) -> Result<FlowId, ActionError> {
        let id = config
            .get("flow_id")
            .or_else(|| config.get("flowId"))
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::Terminal("flow action requires 'flow_id'".to_string()))?;
        FlowId::try_new(id).map_err(|e| ActionError::Terminal(e.to_string()))
    }
}

#[async_trait]
impl ActionSender for FlowSender {
    async fn send(&self, config: &Value, context: &ActionContext) -> Result<Value, ActionError> {
        let flow_id = Self::flow_id(config)?;
        let depth = context.cascade_depth + 1;
        if depth > self.max_cascade_depth {
            tracing::warn!(
                trigger_id = %context.trigger_id,
                flow_id = %flow_id,
                depth,
                "cascade limit reached, flow not started"
            );
            return Err(ActionError::CascadeLimit {
                depth,
                limit: self.max_cascade_depth,
            });
        }

        let mut data: EventData = context.event_data.clone();
        if let Some(Value::Object(extra)) = config.get("data") {
            data.extend(extra.clone());
        }

        let instance = self
            .progression
            .start_with(&flow_id, data, depth)
            .await
            .map_err(|e| match e {
                FlowError::Storage(_) => ActionError::Retryable(e.to_string()),
                other => ActionError::Terminal(other.to_string()),
            })?;

        Ok(json!({
            "flow_id": flow_id,
            "instance_id": instance.id(),
            "cascade_depth": depth,
        }))
    }
}

/// Sender that only logs the action, for dry runs and local setups
#[derive(Debug, Clone, Default)]
pub struct LoggingSender;

#[async_trait]
impl ActionSender for LoggingSender {
    async fn send(&self, config: &Value, context: &ActionContext) -> Result<Value, ActionError> {
        tracing::info!(
            trigger_id = %context.trigger_id,
            event_type = %context.event_type,
            config = %config,
            "action logged"
        );
        Ok(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPublisher, EventType};
    use crate::flow::{Flow, Level, LevelTask};
    use crate::storage::MemoryFlowStore;
    use crate::test_utils::context;

    fn progression(publish: bool) -> Arc<FlowProgression> {
        let mut flow = Flow::new("onboarding", "Onboarding");
        flow.add_level(Level::new("welcome", 1).with_task(LevelTask::new("profile", 0)))
            .unwrap();
        if publish {
            flow.publish().unwrap();
        }
        let store = Arc::new(MemoryFlowStore::new());
        store.store_flow(flow);
        Arc::new(FlowProgression::new(store, EventPublisher::disconnected()))
    }

    #[tokio::test]
    async fn test_flow_action_starts_instance_one_level_deeper() {
        let machine = progression(true);
        let sender = FlowSender::new(Arc::clone(&machine), 5);
        let mut ctx = context();
        ctx.cascade_depth = 2;
        ctx.event_data.insert("customer".into(), json!("acme"));

        let output = sender
            .send(&json!({"flowId": "onboarding", "data": {"plan": "gold"}}), &ctx)
            .await
            .unwrap();
        assert_eq!(output["cascade_depth"], json!(3));

        let id = serde_json::from_value(output["instance_id"].clone()).unwrap();
        let instance = machine.get(id).await.unwrap();
        assert_eq!(instance.cascade_depth(), 3);
        assert_eq!(instance.data()["customer"], json!("acme"));
        assert_eq!(instance.data()["plan"], json!("gold"));
    }

    #[tokio::test]
    async fn test_cascade_limit_is_terminal() {
        let sender = FlowSender::new(progression(true), 2);
        let mut ctx = context();
        ctx.cascade_depth = 2;
        let err = sender
            .send(&json!({"flow_id": "onboarding"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::CascadeLimit { depth: 3, limit: 2 });
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_flow_errors_are_terminal() {
        let sender = FlowSender::new(progression(false), 5);
        let ctx = context();
        let unpublished = sender
            .send(&json!({"flow_id": "onboarding"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(unpublished, ActionError::Terminal(msg) if msg.contains("not published")));

        assert!(matches!(
            sender.send(&json!({}), &ctx).await,
            Err(ActionError::Terminal(_))
        ));
    }

    #[tokio::test]
    async fn test_logging_sender_echoes_config() {
        let mut ctx = context();
        ctx.event_type = EventType::Scheduled;
        let config = json!({"note": "hello"});
        assert_eq!(LoggingSender.send(&config, &ctx).await.unwrap(), config);
    }
}
