//! Bookkeeping for a single submitted unit of work.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::model::{ExecutionType, Span, SpanId};

#[derive(Debug, Default, Clone, Copy)]
struct Timings {
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Timing record for one unit of work, owned by its task record.
///
/// Created at submission time. The start and end of execution are written
/// by the thread that runs the unit.
pub struct WorkerRecord {
    task_path: String,
    execution_type: ExecutionType,
    created_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    timings: Mutex<Timings>,
}

impl WorkerRecord {
    pub fn new(
        task_path: impl Into<String>,
        execution_type: ExecutionType,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let created_at = clock.now();
        Self {
            task_path: task_path.into(),
            execution_type,
            created_at,
            clock,
            timings: Mutex::new(Timings::default()),
        }
    }

    pub fn task_path(&self) -> &str {
        &self.task_path
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.execution_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timings.lock().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.timings.lock().ended_at
    }

    pub fn execution_started(&self) {
        self.timings.lock().started_at = Some(self.clock.now());
    }

    pub fn execution_finished(&self) {
        self.timings.lock().ended_at = Some(self.clock.now());
    }

    pub fn is_finished(&self) -> bool {
        self.timings.lock().ended_at.is_some()
    }

    /// Time spent queued between submission and the start of execution.
    pub fn wait_time(&self) -> TimeDelta {
        match self.timings.lock().started_at {
            Some(started) => (started - self.created_at).max(TimeDelta::zero()),
            None => TimeDelta::zero(),
        }
    }

    /// Execution time. Zero until the unit has both started and finished.
    pub fn duration(&self) -> TimeDelta {
        let timings = *self.timings.lock();
        match (timings.started_at, timings.ended_at) {
            (Some(started), Some(ended)) => (ended - started).max(TimeDelta::zero()),
            _ => TimeDelta::zero(),
        }
    }

    /// Build this worker's span under `parent_id`.
    pub fn to_span(&self, id: SpanId, parent_id: SpanId) -> Span {
        let start = self.started_at().unwrap_or(self.created_at);
        Span::new(self.execution_type, start, self.duration())
            .with_id(id)
            .with_parent(parent_id)
    }
}

impl std::fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let timings = *self.timings.lock();
        f.debug_struct("WorkerRecord")
            .field("task_path", &self.task_path)
            .field("execution_type", &self.execution_type)
            .field("created_at", &self.created_at)
            .field("started_at", &timings.started_at)
            .field("ended_at", &timings.ended_at)
            .finish()
    }
}
