//! Runs units on a tokio blocking pool and books them into the owner's
//! ledger entry.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::KeyValue;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

use crate::dispatch::{WorkExecutor, WorkUnit};
use crate::error::{Error, Result};
use crate::ledger::LedgerEntry;
use crate::model::ExecutionType;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_unit_outcome, start_unit_span};

#[derive(Default)]
struct Outstanding {
    count: usize,
    failures: Vec<String>,
}

/// Counts units in flight and collects their failures.
#[derive(Default)]
struct CompletionTracker {
    state: Mutex<Outstanding>,
    idle: Condvar,
}

impl CompletionTracker {
    fn begin(&self) {
        self.state.lock().count += 1;
    }

    fn finish(&self, failure: Option<String>) {
        let mut state = self.state.lock();
        state.count -= 1;
        if let Some(cause) = failure {
            state.failures.push(cause);
        }
        if state.count == 0 {
            self.idle.notify_all();
        }
    }

    /// Wait for the count to reach zero and take the failures seen so far.
    fn wait(&self) -> Vec<String> {
        let mut state = self.state.lock();
        while state.count > 0 {
            self.idle.wait(&mut state);
        }
        std::mem::take(&mut state.failures)
    }
}

/// Reports one unit to the tracker when dropped. A unit whose closure is
/// dropped without running (the pool was shut down) reports `cause` as set
/// at submission.
struct PendingUnit {
    tracker: Arc<CompletionTracker>,
    cause: Option<String>,
}

impl PendingUnit {
    fn complete(mut self, failure: Option<String>) {
        self.cause = failure;
    }
}

impl Drop for PendingUnit {
    fn drop(&mut self) {
        self.tracker.finish(self.cause.take());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Executor that hands units to a blocking thread pool.
///
/// Every submission is registered in the owner's ledger entry under its
/// worker key before it is queued. The pool thread marks the worker record
/// started and finished around the unit and reports it back to the ledger.
pub struct PooledExecutor {
    owner: String,
    ledger: LedgerEntry,
    handle: Handle,
    // Keeps a runtime owned by `Workers` alive for as long as this executor.
    _runtime: Option<Arc<Runtime>>,
    tracker: Arc<CompletionTracker>,
    sequence: AtomicU64,
}

impl PooledExecutor {
    pub fn new(owner: impl Into<String>, ledger: LedgerEntry, handle: Handle) -> Self {
        Self {
            owner: owner.into(),
            ledger,
            handle,
            _runtime: None,
            tracker: Arc::new(CompletionTracker::default()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Executor on a runtime it shares ownership of.
    pub fn on_runtime(owner: impl Into<String>, ledger: LedgerEntry, runtime: Arc<Runtime>) -> Self {
        let mut executor = Self::new(owner, ledger, runtime.handle().clone());
        executor._runtime = Some(runtime);
        executor
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ledger(&self) -> &LedgerEntry {
        &self.ledger
    }

    /// Units submitted and not yet completed.
    pub fn outstanding(&self) -> usize {
        self.tracker.state.lock().count
    }

    // Submission order suffix keeps identical (action, params) pairs apart.
    fn next_key(&self, unit: &WorkUnit) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}#{seq}", unit.key_for(&self.owner))
    }
}

impl WorkExecutor for PooledExecutor {
    fn submit(&self, unit: WorkUnit) -> Result<()> {
        let key = self.next_key(&unit);
        self.ledger
            .add_worker(key.clone(), ExecutionType::WorkerExecution);
        self.tracker.begin();
        metrics::units_submitted().add(1, &[KeyValue::new("backend", "pooled")]);
        debug!(owner = %self.owner, key = %key, "unit queued");

        let owner = self.owner.clone();
        let ledger = self.ledger.clone();
        let pending = PendingUnit {
            tracker: Arc::clone(&self.tracker),
            cause: Some(format!("{}: cancelled before it ran", unit.action())),
        };
        self.handle.spawn_blocking(move || {
            let action = unit.action().to_string();
            let span = start_unit_span(&owner, &action, &key);
            let _entered = span.enter();

            let worker = ledger.get(&key);
            worker.execution_started();
            let failure = match std::panic::catch_unwind(AssertUnwindSafe(move || unit.run())) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{action}: {e:#}")),
                Err(payload) => Some(format!("{action}: panicked: {}", panic_message(&*payload))),
            };
            worker.execution_finished();
            ledger.worker_finished(&worker);

            record_unit_outcome(&span, failure.is_none());
            if let Some(ref cause) = failure {
                warn!(owner = %owner, key = %key, "unit failed: {cause}");
                metrics::unit_failures().add(1, &[KeyValue::new("backend", "pooled")]);
            }
            pending.complete(failure);
        });
        Ok(())
    }

    fn await_all(&self) -> Result<()> {
        self.ledger.set_task_waiting();
        let causes = self.tracker.wait();
        if causes.is_empty() {
            Ok(())
        } else {
            Err(Error::WorkerExecution { causes })
        }
    }

    fn close(&self) -> Result<()> {
        self.ledger.set_task_closed();
        Ok(())
    }
}

impl std::fmt::Debug for PooledExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("owner", &self.owner)
            .field("ledger", &self.ledger.task_path())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
