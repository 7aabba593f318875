//! Per-task ledger: lifecycle, worker map, and the final task span.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::ledger::worker::WorkerRecord;
use crate::model::{ExecutionType, Span, SpanId, TaskStatus};
use crate::sink::RecordSink;
use crate::telemetry::metrics;

struct TaskState {
    status: TaskStatus,
    end_time: Option<DateTime<Utc>>,
    close_time: Option<DateTime<Utc>>,
    workers: HashMap<String, Arc<WorkerRecord>>,
    child_spans: Vec<Span>,
}

impl TaskState {
    fn all_workers_finished(&self) -> bool {
        self.workers.values().all(|w| w.is_finished())
    }

    fn last_worker_completion_time(&self) -> Option<DateTime<Utc>> {
        self.workers.values().filter_map(|w| w.ended_at()).max()
    }

    fn set_status(&mut self, task_path: &str, to: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        debug!(task = task_path, from = %self.status, to = %to, "task status");
        self.status = to;
        true
    }
}

/// Bookkeeping for one task invocation.
///
/// All mutable state sits behind a single lock, so the "task closed and
/// every worker finished" check and the `end_time` write it guards happen
/// atomically with respect to worker completions. Records never contend
/// with each other.
pub struct TaskRecord {
    task_path: String,
    project_path: String,
    variant: Option<String>,
    span_id: SpanId,
    start_time: DateTime<Utc>,
    sink: Arc<dyn RecordSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<TaskState>,
}

impl TaskRecord {
    pub fn new(
        sink: Arc<dyn RecordSink>,
        clock: Arc<dyn Clock>,
        task_path: impl Into<String>,
        project_path: impl Into<String>,
        variant: Option<String>,
    ) -> Self {
        let span_id = sink.allocate_id();
        let start_time = clock.now();
        Self {
            task_path: task_path.into(),
            project_path: project_path.into(),
            variant,
            span_id,
            start_time,
            sink,
            clock,
            state: Mutex::new(TaskState {
                status: TaskStatus::Running,
                end_time: None,
                close_time: None,
                workers: HashMap::new(),
                child_spans: Vec::new(),
            }),
        }
    }

    pub fn task_path(&self) -> &str {
        &self.task_path
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().end_time
    }

    pub fn close_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().close_time
    }

    pub fn worker_count(&self) -> usize {
        self.state.lock().workers.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// The task is blocking on its workers. Only a running task can wait;
    /// an await issued on behalf of a closed task leaves its status alone.
    pub fn set_task_waiting(&self) {
        let mut state = self.state.lock();
        if matches!(state.status, TaskStatus::Running | TaskStatus::Await) {
            state.set_status(&self.task_path, TaskStatus::Await);
        }
    }

    /// The task returned control to the scheduler.
    pub fn set_task_closed(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.set_status(&self.task_path, TaskStatus::Closed) {
            state.close_time = Some(now);
        }
    }

    /// The scheduler reported the task as done.
    pub fn set_task_finished(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.set_status(&self.task_path, TaskStatus::Finished) && state.end_time.is_none() {
            state.end_time = Some(now);
        }
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// Register a worker under `key`. An existing entry with the same key is
    /// replaced.
    pub fn add_worker(&self, key: impl Into<String>, execution_type: ExecutionType) {
        let worker = Arc::new(WorkerRecord::new(
            self.task_path.clone(),
            execution_type,
            Arc::clone(&self.clock),
        ));
        let key = key.into();
        let mut state = self.state.lock();
        if state.workers.insert(key.clone(), worker).is_some() {
            debug!(task = %self.task_path, key = %key, "worker key reused, replacing record");
        }
    }

    /// Look up a worker, falling back to an unregistered stand-in.
    pub fn get(&self, key: &str) -> Arc<WorkerRecord> {
        let found = self.state.lock().workers.get(key).cloned();
        found.unwrap_or_else(super::null_worker)
    }

    pub fn all_workers_finished(&self) -> bool {
        self.state.lock().all_workers_finished()
    }

    /// Called once by the thread that ran `worker`, after it finished.
    ///
    /// Writes the worker's span and, when the task has already released
    /// control and this was the last outstanding worker, moves `end_time`
    /// to now.
    pub fn worker_finished(&self, worker: &WorkerRecord) {
        let mut state = self.state.lock();

        let span = worker.to_span(self.sink.allocate_id(), self.span_id);
        match self
            .sink
            .write(&self.project_path, self.variant.as_deref(), &span, &[])
        {
            Ok(()) => metrics::spans_written().add(1, &[metrics::kind(worker.execution_type())]),
            Err(e) => warn!(task = %self.task_path, "failed to write worker span: {e}"),
        }
        metrics::worker_wait_ms().record(worker.wait_time().num_milliseconds() as f64, &[]);

        if state.status.has_released_control() && state.all_workers_finished() {
            let now = self.clock.now();
            state.end_time = Some(state.end_time.map_or(now, |end| end.max(now)));
            debug!(task = %self.task_path, "last worker finished after task released control");
        }
    }

    /// Shortest queueing delay among the workers, zero when there are none.
    pub fn minimum_wait_time(&self) -> TimeDelta {
        self.state
            .lock()
            .workers
            .values()
            .map(|w| w.wait_time())
            .min()
            .unwrap_or_else(TimeDelta::zero)
    }

    /// Latest end among finished workers.
    pub fn last_worker_completion_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_worker_completion_time()
    }

    /// `max(end_time, last worker completion) - start_time`, never negative.
    /// Zero while neither is known.
    pub fn duration(&self) -> TimeDelta {
        self.duration_of(&self.state.lock())
    }

    fn duration_of(&self, state: &TaskState) -> TimeDelta {
        let end = match (state.end_time, state.last_worker_completion_time()) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return TimeDelta::zero(),
        };
        (end - self.start_time).max(TimeDelta::zero())
    }

    // -----------------------------------------------------------------------
    // Spans
    // -----------------------------------------------------------------------

    /// Attach a sub-interval measured by the task itself. Ignored once the
    /// task span has been written.
    pub fn add_span(
        &self,
        execution_type: ExecutionType,
        thread_id: u64,
        start: DateTime<Utc>,
        duration: TimeDelta,
    ) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        state.child_spans.push(
            Span::new(execution_type, start, duration)
                .with_parent(self.span_id)
                .with_thread(thread_id),
        );
    }

    /// Emit the task span with its child spans. Only the first call writes;
    /// returns whether this call did.
    pub fn write_task_span(&self) -> bool {
        let mut state = self.state.lock();
        if !state.set_status(&self.task_path, TaskStatus::SpanClosed) {
            return false;
        }

        let duration = self.duration_of(&state);
        let span = Span::new(ExecutionType::TaskExecution, self.start_time, duration)
            .with_id(self.span_id)
            .with_task(self.task_path.clone());
        match self.sink.write(
            &self.project_path,
            self.variant.as_deref(),
            &span,
            &state.child_spans,
        ) {
            Ok(()) => metrics::spans_written().add(1, &[metrics::kind(ExecutionType::TaskExecution)]),
            Err(e) => warn!(task = %self.task_path, "failed to write task span: {e}"),
        }
        metrics::task_duration_ms().record(duration.num_milliseconds() as f64, &[]);
        true
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskRecord")
            .field("task_path", &self.task_path)
            .field("project_path", &self.project_path)
            .field("variant", &self.variant)
            .field("span_id", &self.span_id)
            .field("status", &state.status)
            .field("workers", &state.workers.len())
            .finish()
    }
}
