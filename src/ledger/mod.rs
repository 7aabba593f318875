//! Task and worker timing ledger.
//!
//! A [`TaskRecord`] tracks one task invocation and the units of work it
//! spawned. Callers that may run outside any tracked task hold a
//! [`LedgerEntry`], whose `Null` variant swallows every call.

pub mod task;
pub mod worker;

use std::sync::Arc;

use chrono::TimeDelta;

use crate::clock::SystemClock;
use crate::model::ExecutionType;

pub use task::TaskRecord;
pub use worker::WorkerRecord;

/// Task path reported by stand-in worker records.
pub const NULL_TASK_PATH: &str = "dummy";

/// Worker record handed out for keys nobody registered. Already marked as
/// started, never finished, and not attached to any task.
pub(crate) fn null_worker() -> Arc<WorkerRecord> {
    let worker = WorkerRecord::new(
        NULL_TASK_PATH,
        ExecutionType::WorkerExecution,
        Arc::new(SystemClock),
    );
    worker.execution_started();
    Arc::new(worker)
}

/// Either a real task record or the process-wide null record.
#[derive(Debug, Clone, Default)]
pub enum LedgerEntry {
    Real(Arc<TaskRecord>),
    #[default]
    Null,
}

impl LedgerEntry {
    pub fn is_null(&self) -> bool {
        matches!(self, LedgerEntry::Null)
    }

    pub fn record(&self) -> Option<&Arc<TaskRecord>> {
        match self {
            LedgerEntry::Real(record) => Some(record),
            LedgerEntry::Null => None,
        }
    }

    pub fn task_path(&self) -> &str {
        match self {
            LedgerEntry::Real(record) => record.task_path(),
            LedgerEntry::Null => NULL_TASK_PATH,
        }
    }

    pub fn set_task_waiting(&self) {
        if let LedgerEntry::Real(record) = self {
            record.set_task_waiting();
        }
    }

    pub fn set_task_closed(&self) {
        if let LedgerEntry::Real(record) = self {
            record.set_task_closed();
        }
    }

    pub fn set_task_finished(&self) {
        if let LedgerEntry::Real(record) = self {
            record.set_task_finished();
        }
    }

    pub fn add_worker(&self, key: impl Into<String>, execution_type: ExecutionType) {
        if let LedgerEntry::Real(record) = self {
            record.add_worker(key, execution_type);
        }
    }

    pub fn get(&self, key: &str) -> Arc<WorkerRecord> {
        match self {
            LedgerEntry::Real(record) => record.get(key),
            LedgerEntry::Null => null_worker(),
        }
    }

    pub fn all_workers_finished(&self) -> bool {
        match self {
            LedgerEntry::Real(record) => record.all_workers_finished(),
            LedgerEntry::Null => true,
        }
    }

    pub fn worker_finished(&self, worker: &WorkerRecord) {
        if let LedgerEntry::Real(record) = self {
            record.worker_finished(worker);
        }
    }

    pub fn duration(&self) -> TimeDelta {
        match self {
            LedgerEntry::Real(record) => record.duration(),
            LedgerEntry::Null => TimeDelta::zero(),
        }
    }

    pub fn write_task_span(&self) -> bool {
        match self {
            LedgerEntry::Real(record) => record.write_task_span(),
            LedgerEntry::Null => false,
        }
    }
}

impl From<Arc<TaskRecord>> for LedgerEntry {
    fn from(record: Arc<TaskRecord>) -> Self {
        LedgerEntry::Real(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_entry_accepts_everything() {
        let entry = LedgerEntry::Null;
        entry.add_worker("k", ExecutionType::WorkerExecution);
        entry.set_task_waiting();
        entry.set_task_closed();
        entry.set_task_finished();

        let worker = entry.get("k");
        assert_eq!(worker.task_path(), NULL_TASK_PATH);
        assert!(worker.started_at().is_some());
        assert!(!worker.is_finished());

        worker.execution_finished();
        entry.worker_finished(&worker);

        assert!(entry.all_workers_finished());
        assert_eq!(entry.duration(), TimeDelta::zero());
        assert!(!entry.write_task_span());
    }
}
