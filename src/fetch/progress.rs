//! Per-task progress reporting and batch-wide failure collection.

use std::collections::BTreeSet;
use std::sync::Mutex;

/// State of one download task.
///
/// Transitions are forward-only, `pending -> running -> {done, failed}`;
/// terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    /// Not yet picked up by a worker.
    Pending,
    /// Currently being fetched.
    Running,
    /// Fetch completed successfully.
    Done,
    /// Fetch failed; details are in the `ErrorLog`.
    Failed,
}

impl TaskState {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// Point-in-time view of a sink, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub state: TaskState,
    pub message: Option<String>,
}

/// Mutable progress holder for exactly one task.
///
/// Written by the single worker executing the task; snapshots may be taken
/// concurrently from other threads.
#[derive(Debug)]
pub struct ProgressSink {
    inner: Mutex<ProgressSnapshot>,
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ProgressSnapshot {
                state: TaskState::Pending,
                message: None,
            }),
        }
    }
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the sink to `next`, optionally updating the human-readable message.
    ///
    /// Only forward transitions are applied; anything else leaves the sink
    /// untouched and returns `false`.
    pub fn advance(&self, next: TaskState, message: Option<String>) -> bool {
        let mut inner = self.inner.lock().expect("progress sink lock poisoned");
        let allowed = matches!(
            (inner.state, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Running, TaskState::Done)
                | (TaskState::Running, TaskState::Failed)
        );
        if allowed {
            inner.state = next;
            if message.is_some() {
                inner.message = message;
            }
        } else {
            tracing::debug!(
                "ignoring non-forward sink transition {} -> {}",
                inner.state,
                next
            );
        }
        allowed
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().expect("progress sink lock poisoned").state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner
            .lock()
            .expect("progress sink lock poisoned")
            .clone()
    }
}

/// One failed task: the task description (destination path) and the error
/// message that was observed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FailureEntry {
    pub task: String,
    pub message: String,
}

impl std::fmt::Display for FailureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.task, self.message)
    }
}

/// Append-only, content-deduplicated collection of failures for one batch run.
///
/// Shared by all workers of a run; entries are never removed while the run is
/// in flight and a fresh log is created for every run.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<BTreeSet<FailureEntry>>,
}

impl ErrorLog {
    pub fn append(&self, task: impl Into<String>, message: impl Into<String>) {
        let entry = FailureEntry {
            task: task.into(),
            message: message.into(),
        };
        self.entries
            .lock()
            .expect("error log lock poisoned")
            .insert(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .expect("error log lock poisoned")
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("error log lock poisoned").len()
    }

    /// All entries, in their content order.
    pub fn entries(&self) -> Vec<FailureEntry> {
        self.entries
            .lock()
            .expect("error log lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
