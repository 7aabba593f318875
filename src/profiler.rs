//! Process-level registry of task records.
//!
//! The scheduler reports task start and finish here; dispatchers resolve
//! their owner's ledger entry here. A task whose workers are still running
//! when it finishes stays registered until they are done or the build ends.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::ledger::{LedgerEntry, TaskRecord};
use crate::model::TaskStatus;
use crate::sink::RecordSink;
use crate::telemetry::task::{record_task_duration, start_task_span};

struct TrackedTask {
    record: Arc<TaskRecord>,
    span: tracing::Span,
}

pub struct Profiler {
    build_id: Uuid,
    sink: Arc<dyn RecordSink>,
    clock: Arc<dyn Clock>,
    tasks: RwLock<HashMap<String, TrackedTask>>,
}

impl Profiler {
    pub fn new(sink: Arc<dyn RecordSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            build_id: Uuid::new_v4(),
            sink,
            clock,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(sink: Arc<dyn RecordSink>) -> Self {
        Self::new(sink, Arc::new(SystemClock))
    }

    /// Identifier of this profiling session.
    pub fn build_id(&self) -> Uuid {
        self.build_id
    }

    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.sink
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Open a record for a task that is about to run.
    pub fn task_started(
        &self,
        task_path: &str,
        project_path: &str,
        variant: Option<&str>,
    ) -> Arc<TaskRecord> {
        let record = Arc::new(TaskRecord::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.clock),
            task_path,
            project_path,
            variant.map(str::to_string),
        ));
        let span = start_task_span(task_path, project_path);
        let previous = self.tasks.write().insert(
            task_path.to_string(),
            TrackedTask {
                record: Arc::clone(&record),
                span,
            },
        );
        if previous.is_some() {
            warn!(task = task_path, "task started twice, previous record dropped");
        }
        debug!(task = task_path, span_id = %record.span_id(), "task started");
        record
    }

    /// Ledger entry for `owner`, or the null entry if it is not tracked.
    pub fn task_record(&self, owner: &str) -> LedgerEntry {
        self.tasks
            .read()
            .get(owner)
            .map(|t| LedgerEntry::Real(Arc::clone(&t.record)))
            .unwrap_or_default()
    }

    /// The scheduler is done with `task_path`. Writes its span right away
    /// when no worker is outstanding; returns whether it did.
    pub fn task_finished(&self, task_path: &str) -> bool {
        let Some(record) = self
            .tasks
            .read()
            .get(task_path)
            .map(|t| Arc::clone(&t.record))
        else {
            debug!(task = task_path, "finish for untracked task ignored");
            return false;
        };

        record.set_task_finished();
        if !record.all_workers_finished() {
            debug!(task = task_path, "task finished with workers outstanding");
            return false;
        }
        self.finalize(task_path)
    }

    /// Write spans for finished tasks whose trailing workers have all
    /// completed. Returns how many were written.
    pub fn flush_completed(&self) -> usize {
        let ready: Vec<String> = self
            .tasks
            .read()
            .iter()
            .filter(|(_, t)| {
                t.record.status() == TaskStatus::Finished
                    && t.record.all_workers_finished()
            })
            .map(|(path, _)| path.clone())
            .collect();
        ready.iter().filter(|path| self.finalize(path)).count()
    }

    /// End of build: write every remaining task span. Returns how many were
    /// written.
    pub fn build_finished(&self) -> usize {
        let remaining: Vec<TrackedTask> = self.tasks.write().drain().map(|(_, t)| t).collect();
        let mut written = 0;
        for task in remaining {
            if !task.record.all_workers_finished() {
                warn!(
                    task = task.record.task_path(),
                    "build finished with workers still running"
                );
            }
            task.record.set_task_finished();
            if task.record.write_task_span() {
                record_task_duration(&task.span, task.record.duration().num_milliseconds());
                written += 1;
            }
        }
        info!(build_id = %self.build_id, written, "build finished");
        written
    }

    /// Paths of tasks still registered.
    pub fn pending_tasks(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.tasks.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn finalize(&self, task_path: &str) -> bool {
        let Some(task) = self.tasks.write().remove(task_path) else {
            return false;
        };
        let written = task.record.write_task_span();
        if written {
            record_task_duration(&task.span, task.record.duration().num_milliseconds());
        }
        written
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("build_id", &self.build_id)
            .field("pending", &self.tasks.read().len())
            .finish()
    }
}
