//! Core data model.
//!
//! A span is a timed interval with a parent link. Task records and worker
//! records both turn into spans when they are finalized; sinks persist them.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Span identity
// ---------------------------------------------------------------------------

/// Identifier handed out by a [`crate::sink::RecordSink`]. Unique per sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId(pub u64);

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Execution type
// ---------------------------------------------------------------------------

/// What kind of interval a span measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// The whole task, from start to its effective end.
    TaskExecution,
    /// A unit submitted through a pooled executor.
    WorkerExecution,
    /// A unit run on a plain thread, or a sub-interval recorded by the task.
    ThreadExecution,
}

impl std::fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionType::TaskExecution => "task_execution",
            ExecutionType::WorkerExecution => "worker_execution",
            ExecutionType::ThreadExecution => "thread_execution",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Span
// ---------------------------------------------------------------------------

/// A finalized timing span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub id: Option<SpanId>,
    pub parent_id: Option<SpanId>,
    pub execution_type: ExecutionType,
    /// Milliseconds since the Unix epoch.
    pub start_time_ms: i64,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u64>,
    /// Set on task spans only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_path: Option<String>,
}

impl Span {
    pub fn new(execution_type: ExecutionType, start: DateTime<Utc>, duration: TimeDelta) -> Self {
        Self {
            id: None,
            parent_id: None,
            execution_type,
            start_time_ms: start.timestamp_millis(),
            duration_ms: duration.num_milliseconds(),
            thread_id: None,
            task_path: None,
        }
    }

    pub fn with_id(mut self, id: SpanId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_parent(mut self, parent_id: SpanId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_thread(mut self, thread_id: u64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_task(mut self, task_path: impl Into<String>) -> Self {
        self.task_path = Some(task_path.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Span record
// ---------------------------------------------------------------------------

/// One persisted write: a span, the project/variant it belongs to, and
/// the child spans that travel with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub span: Span,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Span>,
}

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Run state of the task a ledger entry is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task body is executing.
    Running,
    /// Task called `await_all` and is blocked on its workers. Resumption is
    /// not observed, so the task may in fact be running again.
    Await,
    /// Task handed control back to the scheduler; workers may still run.
    Closed,
    /// Scheduler reported the task as done.
    Finished,
    /// Task span has been written. Terminal.
    SpanClosed,
}

impl TaskStatus {
    /// Has the task stopped running its own body?
    pub fn has_released_control(self) -> bool {
        matches!(self, TaskStatus::Closed | TaskStatus::Finished)
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStatus::SpanClosed
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Running => "running",
            TaskStatus::Await => "await",
            TaskStatus::Closed => "closed",
            TaskStatus::Finished => "finished",
            TaskStatus::SpanClosed => "span_closed",
        };
        write!(f, "{s}")
    }
}
