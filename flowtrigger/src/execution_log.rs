//! Append-only audit trail of trigger evaluations
//!
//! Every evaluation of a trigger against an event produces one
//! [`TriggerExecution`]. Records are never updated; the only removal is
//! retention cleanup.

use crate::action::{ActionResult, ActionType};
use crate::common::ids::ulid_id;
use crate::condition::TraceNode;
use crate::events::{EventData, EventType};
use crate::storage::StorageError;
use crate::trigger::TriggerId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

ulid_id!(
    /// Identifier of an execution record
    ExecutionId,
    "execution ID"
);

/// Aggregate status of one trigger evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Every action succeeded
    Success,
    /// Some actions failed
    PartialSuccess,
    /// Every action failed, or the evaluation itself failed
    Failed,
    /// The trigger did not fire or was not eligible to dispatch
    Skipped,
    /// Conditions matched and the actions wait for their delay
    ///
    /// The action outcome is appended later as its own record.
    Scheduled,
}

impl ExecutionStatus {
    /// Aggregate per-action results
    pub fn from_results(results: &[ActionExecution]) -> Self {
        let succeeded = results.iter().filter(|r| r.result.ok).count();
        if succeeded == results.len() {
            ExecutionStatus::Success
        } else if succeeded == 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::PartialSuccess
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::PartialSuccess => "PARTIAL_SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
            ExecutionStatus::Scheduled => "SCHEDULED",
        };
        f.write_str(text)
    }
}

/// Result of one action within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionExecution {
    /// Action type
    pub action_type: ActionType,
    /// Outcome
    #[serde(flatten)]
    pub result: ActionResult,
}

/// One record of the execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerExecution {
    /// Record identifier
    pub id: ExecutionId,
    /// Trigger evaluated
    pub trigger_id: TriggerId,
    /// Event type evaluated
    pub event_type: EventType,
    /// Event data the conditions saw
    pub event_data: EventData,
    /// Whether the conditions matched
    pub conditions_met: bool,
    /// Condition trace
    pub condition_trace: TraceNode,
    /// Whether gating (duplicates, business hours) let the fire through
    pub dispatch_eligible: bool,
    /// Per-action results, in execution order
    #[serde(default)]
    pub actions_executed: Vec<ActionExecution>,
    /// Aggregate status
    pub status: ExecutionStatus,
    /// Why the execution failed or was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Evaluation plus action time
    pub execution_time_ms: u64,
    /// When the evaluation happened
    pub executed_at: DateTime<Utc>,
}

/// Storage for execution records
pub trait ExecutionLogBackend: Send + Sync {
    /// Append a record
    fn append(&self, record: &TriggerExecution) -> Result<(), StorageError>;

    /// Records of one trigger, in evaluation order
    fn list(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerExecution>, StorageError>;

    /// All records, oldest first
    fn list_all(&self) -> Result<Vec<TriggerExecution>, StorageError>;

    /// Delete records executed before `cutoff`, returning how many were removed
    fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// In-memory execution log
#[derive(Debug, Default)]
pub struct MemoryExecutionLog {
    records: DashMap<TriggerId, Vec<TriggerExecution>>,
}

impl ExecutionLogBackend for MemoryExecutionLog {
    fn append(&self, record: &TriggerExecution) -> Result<(), StorageError> {
        self.records
            .entry(record.trigger_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn list(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerExecution>, StorageError> {
        let mut records = self
            .records
            .get(trigger_id)
            .map(|records| records.clone())
            .unwrap_or_default();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    fn list_all(&self) -> Result<Vec<TriggerExecution>, StorageError> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|record| record.id);
        Ok(all)
    }

    fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;
        for mut entry in self.records.iter_mut() {
            let before = entry.len();
            entry.retain(|record| record.executed_at >= cutoff);
            removed += before - entry.len();
        }
        Ok(removed)
    }
}

/// Execution log stored as one JSON-lines file per trigger
#[derive(Debug)]
pub struct FileSystemExecutionLog {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSystemExecutionLog {
    /// Create a log under `base_path`, creating the directory if needed
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|source| StorageError::Io {
            path: base_path.clone(),
            source,
        })?;
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    fn file_for(&self, trigger_id: &TriggerId) -> PathBuf {
        let safe: String = trigger_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_path.join(format!("{safe}.jsonl"))
    }

    fn read_file(path: &Path) -> Result<Vec<TriggerExecution>, StorageError> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| StorageError::Parse {
                path: path.to_path_buf(),
                message: format!("line {}: {}", number + 1, e),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn log_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let entries = fs::read_dir(&self.base_path).map_err(|source| StorageError::Io {
            path: self.base_path.clone(),
            source,
        })?;
        let mut files: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ExecutionLogBackend for FileSystemExecutionLog {
    fn append(&self, record: &TriggerExecution) -> Result<(), StorageError> {
        let path = self.file_for(&record.trigger_id);
        let line = serde_json::to_string(record).map_err(|e| StorageError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let _guard = self.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| StorageError::Io { path, source })
    }

    fn list(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerExecution>, StorageError> {
        let _guard = self.lock();
        let mut records: Vec<_> = Self::read_file(&self.file_for(trigger_id))?
            .into_iter()
            .filter(|record| &record.trigger_id == trigger_id)
            .collect();
        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    fn list_all(&self) -> Result<Vec<TriggerExecution>, StorageError> {
        let _guard = self.lock();
        let mut all = Vec::new();
        for path in self.log_files()? {
            all.extend(Self::read_file(&path)?);
        }
        all.sort_by_key(|record| record.id);
        Ok(all)
    }

    fn remove_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.lock();
        let mut removed = 0;
        for path in self.log_files()? {
            let records = Self::read_file(&path)?;
            let kept: Vec<_> = records
                .iter()
                .filter(|record| record.executed_at >= cutoff)
                .collect();
            if kept.len() == records.len() {
                continue;
            }
            removed += records.len() - kept.len();

            let mut content = String::new();
            for record in kept {
                let line = serde_json::to_string(record).map_err(|e| StorageError::Parse {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                content.push_str(&line);
                content.push('\n');
            }
            let temp = path.with_extension("jsonl.tmp");
            fs::write(&temp, content)
                .and_then(|()| fs::rename(&temp, &path))
                .map_err(|source| StorageError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(removed)
    }
}

/// Shared handle to an execution log backend
#[derive(Clone)]
pub struct ExecutionLog {
    backend: Arc<dyn ExecutionLogBackend>,
}

impl fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLog").finish_non_exhaustive()
    }
}

impl ExecutionLog {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn ExecutionLogBackend>) -> Self {
        Self { backend }
    }

    /// In-memory log
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryExecutionLog::default()))
    }

    /// JSON-lines log under a directory
    pub fn file_system(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(FileSystemExecutionLog::new(base_path)?)))
    }

    /// Append a record
    pub fn append(&self, record: &TriggerExecution) -> Result<(), StorageError> {
        tracing::debug!(
            trigger_id = %record.trigger_id,
            execution_id = %record.id,
            status = %record.status,
            "execution recorded"
        );
        self.backend.append(record)
    }

    /// Records of one trigger, oldest first
    pub fn list(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerExecution>, StorageError> {
        self.backend.list(trigger_id)
    }

    /// All records, oldest first
    pub fn list_all(&self) -> Result<Vec<TriggerExecution>, StorageError> {
        self.backend.list_all()
    }

    /// Delete records older than `days` days
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize, StorageError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let removed = self.backend.remove_before(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, days, "execution log cleaned up");
        }
        Ok(removed)
    }
}
