//! Bounded worker pool running the action lists of fired triggers

use super::{Action, ActionContext, ActionExecutor};
use crate::execution_log::{ActionExecution, ExecutionLog, ExecutionStatus, TriggerExecution};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A fired trigger's actions plus the record to complete once they ran
#[derive(Debug)]
pub struct ActionJob {
    /// Actions to run, in order
    pub actions: Vec<Action>,
    /// Context handed to every sender
    pub context: ActionContext,
    /// Execution record holding the evaluation result
    pub execution: TriggerExecution,
    /// Wait before running
    pub delay: Duration,
    /// Receives the completed record
    pub done: Option<oneshot::Sender<TriggerExecution>>,
}

/// Fixed set of workers fed by a bounded queue
///
/// Delayed jobs wait in timer tasks and enter the queue when due. Shutdown
/// stops intake, records still-pending delayed jobs as failed and waits for
/// queued jobs to finish.
pub struct ActionPool {
    tx: Mutex<Option<mpsc::Sender<ActionJob>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    log: ExecutionLog,
}

impl std::fmt::Debug for ActionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionPool")
            .field("tasks", &self.tracker.len())
            .finish()
    }
}

impl ActionPool {
    /// Spawn `workers` workers sharing a queue of `capacity` jobs
    pub fn start(
        executor: Arc<ActionExecutor>,
        log: ExecutionLog,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<ActionJob>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let tracker = TaskTracker::new();

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let executor = Arc::clone(&executor);
            let log = log.clone();
            tracker.spawn(async move {
                loop {
                    let job = rx.lock().await.recv().await;
                    match job {
                        Some(job) => run_job(&executor, &log, job).await,
                        None => break,
                    }
                }
                tracing::debug!(worker, "action worker stopped");
            });
        }

        Self {
            tx: Mutex::new(Some(tx)),
            tracker,
            cancel: CancellationToken::new(),
            log,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<ActionJob>> {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Queue a job, waiting for room; returns the job back if the pool is shut down
    pub async fn submit(&self, job: ActionJob) -> Result<(), Box<ActionJob>> {
        let Some(tx) = self.sender() else {
            return Err(Box::new(job));
        };

        if job.delay.is_zero() {
            return tx.send(job).await.map_err(|e| Box::new(e.0));
        }

        let cancel = self.cancel.clone();
        let log = self.log.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(job.delay) => {
                    if let Err(e) = tx.send(job).await {
                        abandon(&log, e.0, "pool closed before delayed execution");
                    }
                }
                _ = cancel.cancelled() => {
                    abandon(&log, job, "shutdown before delayed execution");
                }
            }
        });
        Ok(())
    }

    /// Stop accepting jobs and wait for queued work to finish
    pub async fn shutdown(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("action pool drained");
    }
}

fn abandon(log: &ExecutionLog, job: ActionJob, reason: &str) {
    tracing::warn!(trigger_id = %job.context.trigger_id, "{}", reason);
    let mut execution = job.execution;
    execution.status = ExecutionStatus::Failed;
    execution.error_message = Some(reason.to_string());
    if let Err(e) = log.append(&execution) {
        tracing::error!("failed to record execution: {}", e);
    }
    if let Some(done) = job.done {
        let _ = done.send(execution);
    }
}

async fn run_job(executor: &ActionExecutor, log: &ExecutionLog, job: ActionJob) {
    let started = Instant::now();
    let mut results = Vec::with_capacity(job.actions.len());

    // Earlier actions are never rolled back when a later one fails.
    for action in &job.actions {
        let result = executor.execute(action, &job.context).await;
        results.push(ActionExecution {
            action_type: action.action_type,
            result,
        });
    }

    let mut execution = job.execution;
    execution.status = ExecutionStatus::from_results(&results);
    execution.error_message = results
        .iter()
        .find_map(|r| r.result.error.clone())
        .filter(|_| execution.status != ExecutionStatus::Success);
    execution.actions_executed = results;
    execution.execution_time_ms += started.elapsed().as_millis() as u64;

    tracing::info!(
        trigger_id = %execution.trigger_id,
        status = %execution.status,
        actions = execution.actions_executed.len(),
        "trigger actions finished"
    );

    if let Err(e) = log.append(&execution) {
        tracing::error!(trigger_id = %execution.trigger_id, "failed to record execution: {}", e);
    }
    if let Some(done) = job.done {
        let _ = done.send(execution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionType, RetryPolicy};
    use crate::test_utils::{context, execution_record, FailingSender, RecordingSender};
    use chrono::Utc;
    use serde_json::json;

    fn job(actions: Vec<Action>, delay: Duration) -> (ActionJob, oneshot::Receiver<TriggerExecution>) {
        let (done, rx) = oneshot::channel();
        (
            ActionJob {
                actions,
                context: context(),
                execution: execution_record("t", Utc::now()),
                delay,
                done: Some(done),
            },
            rx,
        )
    }

    fn pool(log: ExecutionLog) -> (ActionPool, Arc<RecordingSender>) {
        let recorder = Arc::new(RecordingSender::new());
        let executor = ActionExecutor::new(Duration::from_secs(1), RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        })
        .with_sender(ActionType::Email, recorder.clone())
        .with_sender(ActionType::Database, Arc::new(FailingSender::terminal()));
        (ActionPool::start(Arc::new(executor), log, 2, 8), recorder)
    }

    #[tokio::test]
    async fn test_partial_success_keeps_earlier_actions() {
        let log = ExecutionLog::memory();
        let (pool, recorder) = pool(log.clone());
        let (job, rx) = job(
            vec![
                Action::new(ActionType::Email, json!({"to": "a"})),
                Action::new(ActionType::Database, json!({})),
            ],
            Duration::ZERO,
        );
        pool.submit(job).await.unwrap();
        let execution = rx.await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::PartialSuccess);
        assert_eq!(execution.actions_executed.len(), 2);
        assert!(execution.error_message.is_some());
        assert_eq!(recorder.calls().len(), 1);
        pool.shutdown().await;
        assert_eq!(log.list_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let (pool, _) = pool(ExecutionLog::memory());
        let (job, rx) = job(vec![Action::new(ActionType::Webhook, json!({}))], Duration::ZERO);
        pool.submit(job).await.unwrap();
        assert_eq!(rx.await.unwrap().status, ExecutionStatus::Failed);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_runs_when_due() {
        let (pool, recorder) = pool(ExecutionLog::memory());
        let (job, rx) = job(
            vec![Action::new(ActionType::Email, json!({}))],
            Duration::from_secs(30),
        );
        pool.submit(job).await.unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(recorder.calls().is_empty());

        let execution = rx.await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(recorder.calls().len(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_records_pending_delayed_jobs() {
        let log = ExecutionLog::memory();
        let (pool, recorder) = pool(log.clone());
        let (job, rx) = job(
            vec![Action::new(ActionType::Email, json!({}))],
            Duration::from_secs(3600),
        );
        pool.submit(job).await.unwrap();
        pool.shutdown().await;

        let execution = rx.await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(recorder.calls().is_empty());
        assert_eq!(log.list_all().unwrap().len(), 1);

        let (late, _rx) = job_after_shutdown();
        assert!(pool.submit(late).await.is_err());
    }

    fn job_after_shutdown() -> (ActionJob, oneshot::Receiver<TriggerExecution>) {
        job(vec![Action::new(ActionType::Email, json!({}))], Duration::ZERO)
    }
}
