//! Single-action execution with timeout and retry

use super::{Action, ActionContext, ActionError, ActionResult, ActionSender, ActionType};
use crate::config::EngineConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Doubling delay starting at `base`, capped at `max`
    ExponentialBackoff {
        /// Delay before the second attempt
        base: Duration,
        /// Upper bound
        max: Duration,
    },
    /// Same delay before every retry
    FixedDelay(Duration),
}

/// How often and how patiently an action is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay schedule
    pub strategy: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::ExponentialBackoff {
                base: Duration::from_millis(200),
                max: Duration::from_secs(5),
            },
        }
    }
}

impl RetryPolicy {
    /// Policy described by the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            strategy: RetryStrategy::ExponentialBackoff {
                base: Duration::from_millis(config.backoff_base_ms),
                max: Duration::from_millis(config.backoff_max_ms),
            },
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::ExponentialBackoff { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(multiplier).min(max)
            }
            RetryStrategy::FixedDelay(delay) => delay,
        }
    }
}

/// Routes actions to senders and applies timeout and retry
#[derive(Clone)]
pub struct ActionExecutor {
    senders: HashMap<ActionType, Arc<dyn ActionSender>>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self.senders.keys().map(|t| t.to_string()).collect();
        registered.sort();
        f.debug_struct("ActionExecutor")
            .field("senders", &registered)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ActionExecutor {
    /// Create an executor without senders
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            senders: HashMap::new(),
            timeout,
            retry,
        }
    }

    /// Create an executor using the configured timeout and retry policy
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.action_timeout(), RetryPolicy::from_config(config))
    }

    /// Register the sender for an action type, replacing any previous one
    pub fn register(&mut self, action_type: ActionType, sender: Arc<dyn ActionSender>) {
        self.senders.insert(action_type, sender);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_sender(mut self, action_type: ActionType, sender: Arc<dyn ActionSender>) -> Self {
        self.register(action_type, sender);
        self
    }

    /// Whether a sender exists for the type
    pub fn has_sender(&self, action_type: ActionType) -> bool {
        self.senders.contains_key(&action_type)
    }

    /// Execute one action; failures are captured in the result, never returned
    pub async fn execute(&self, action: &Action, context: &ActionContext) -> ActionResult {
        let started = Instant::now();
        let (outcome, attempts) = self.execute_with_retry(action, context).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => ActionResult {
                ok: true,
                output: Some(output),
                error: None,
                attempts,
                duration_ms,
            },
            Err(error) => {
                tracing::error!(
                    trigger_id = %context.trigger_id,
                    action_type = %action.action_type,
                    attempts,
                    "action failed: {}",
                    error
                );
                ActionResult {
                    ok: false,
                    output: None,
                    error: Some(error.to_string()),
                    attempts,
                    duration_ms,
                }
            }
        }
    }

    async fn execute_with_retry(
        &self,
        action: &Action,
        context: &ActionContext,
    ) -> (Result<Value, ActionError>, u32) {
        let Some(sender) = self.senders.get(&action.action_type) else {
            return (Err(ActionError::NoSender(action.action_type)), 0);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.timeout, sender.send(&action.config, context)).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout {
                    timeout: self.timeout,
                }),
            };

            match result {
                Ok(output) => {
                    tracing::debug!(
                        trigger_id = %context.trigger_id,
                        action_type = %action.action_type,
                        attempt,
                        "action succeeded"
                    );
                    return (Ok(output), attempt);
                }
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let wait = self.retry.delay_after(attempt);
                    tracing::warn!(
                        trigger_id = %context.trigger_id,
                        action_type = %action.action_type,
                        "Error occurred (attempt {}/{}): {}. Waiting {:?} before retry...",
                        attempt,
                        self.retry.max_attempts,
                        error,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(error) => return (Err(error), attempt),
            }
        }
    }
}
