//! Integration tests for work dispatch and the profiler registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use taskspan::config::ExecutionConfig;
use taskspan::dispatch::{DirectExecutor, UnitResult, WorkAction, WorkExecutor, WorkUnit, Workers};
use taskspan::error::Error;
use taskspan::model::{ExecutionType, TaskStatus};
use taskspan::profiler::Profiler;
use taskspan::sink::MemorySink;

fn test_profiler() -> (Arc<Profiler>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Arc::new(Profiler::with_system_clock(sink.clone())), sink)
}

fn pooled(profiler: &Arc<Profiler>, threads: usize) -> Workers {
    Workers::new(
        ExecutionConfig {
            use_worker_pool: true,
            worker_threads: Some(threads),
        },
        Arc::clone(profiler),
    )
    .expect("failed to build pooled workers")
}

fn counting_unit(counter: &Arc<AtomicUsize>, n: usize, sleep_ms: u64) -> WorkUnit {
    let counter = Arc::clone(counter);
    WorkUnit::new("Count", n, move |_| {
        std::thread::sleep(Duration::from_millis(sleep_ms));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

fn worker_spans(sink: &MemorySink) -> usize {
    sink.records()
        .iter()
        .filter(|r| r.span.execution_type == ExecutionType::WorkerExecution)
        .count()
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

#[test]
fn config_flag_selects_the_backend() {
    let (profiler, _sink) = test_profiler();

    let direct = Workers::new(
        ExecutionConfig {
            use_worker_pool: false,
            worker_threads: None,
        },
        Arc::clone(&profiler),
    )
    .unwrap();
    assert!(!direct.uses_worker_pool());

    let pool = pooled(&profiler, 2);
    assert!(pool.uses_worker_pool());
}

#[test]
fn pooled_backend_can_share_an_existing_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (profiler, sink) = test_profiler();
    let workers = Workers::with_handle(
        ExecutionConfig::default(),
        Arc::clone(&profiler),
        runtime.handle().clone(),
    );
    assert!(workers.uses_worker_pool());

    profiler.task_started(":lib:compile", ":lib", None);
    let executor = workers.executor_for(":lib:compile");
    let counter = Arc::new(AtomicUsize::new(0));
    executor.submit(counting_unit(&counter, 1, 5)).unwrap();
    executor.await_all().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(worker_spans(&sink), 1);
}

#[test]
fn zero_worker_threads_is_a_config_error() {
    let (profiler, _sink) = test_profiler();
    let result = Workers::new(
        ExecutionConfig {
            use_worker_pool: true,
            worker_threads: Some(0),
        },
        profiler,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

// ---------------------------------------------------------------------------
// Direct
// ---------------------------------------------------------------------------

#[test]
fn direct_submit_runs_before_close_returns() {
    let executor = DirectExecutor::new(":app:lint");
    let counter = Arc::new(AtomicUsize::new(0));

    executor.submit(counting_unit(&counter, 0, 0)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    executor.close().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    executor.await_all().unwrap();
}

#[test]
fn direct_submit_propagates_unit_failure() {
    let executor = DirectExecutor::new(":app:lint");
    let err = executor
        .submit(WorkUnit::new("Explode", 1_u32, |_| anyhow::bail!("disk full")))
        .unwrap_err();

    match err {
        Error::WorkUnit { action, message } => {
            assert_eq!(action, "Explode");
            assert!(message.contains("disk full"));
        }
        other => panic!("expected WorkUnit, got {other:?}"),
    }
}

#[test]
fn direct_backend_does_not_touch_the_ledger() {
    let (profiler, sink) = test_profiler();
    let workers = Workers::direct(Arc::clone(&profiler));
    let record = profiler.task_started(":app:lint", ":app", None);

    let executor = workers.executor_for(":app:lint");
    let counter = Arc::new(AtomicUsize::new(0));
    executor.submit(counting_unit(&counter, 0, 0)).unwrap();
    executor.close().unwrap();

    assert_eq!(record.worker_count(), 0);
    assert_eq!(record.status(), TaskStatus::Running);
    assert!(sink.is_empty());
}

// ---------------------------------------------------------------------------
// Pooled
// ---------------------------------------------------------------------------

#[test]
fn pooled_await_waits_for_every_unit() {
    let (profiler, sink) = test_profiler();
    let workers = pooled(&profiler, 2);
    let record = profiler.task_started(":app:dex", ":app", Some("release"));

    let executor = workers.executor_for(":app:dex");
    let counter = Arc::new(AtomicUsize::new(0));
    for n in 0..6 {
        executor.submit(counting_unit(&counter, n, 15)).unwrap();
    }
    executor.await_all().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 6);
    assert_eq!(record.worker_count(), 6);
    assert!(record.all_workers_finished());
    assert_eq!(worker_spans(&sink), 6);
    assert_eq!(record.status(), TaskStatus::Await);
}

#[test]
fn identical_units_get_separate_worker_records() {
    let (profiler, _sink) = test_profiler();
    let workers = pooled(&profiler, 2);
    let record = profiler.task_started(":app:dex", ":app", None);

    let executor = workers.executor_for(":app:dex");
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        executor.submit(counting_unit(&counter, 42, 1)).unwrap();
    }
    executor.await_all().unwrap();

    assert_eq!(record.worker_count(), 3);
}

#[test]
fn pooled_await_reports_every_failure_once() {
    let (profiler, _sink) = test_profiler();
    let workers = pooled(&profiler, 3);
    profiler.task_started(":app:shrink", ":app", None);

    let executor = workers.executor_for(":app:shrink");
    executor
        .submit(WorkUnit::new("Ok", 0_u8, |_| Ok(())))
        .unwrap();
    executor
        .submit(WorkUnit::new("Fails", 1_u8, |_| anyhow::bail!("bad input")))
        .unwrap();
    executor
        .submit(WorkUnit::new("Panics", 2_u8, |_| panic!("worker blew up")))
        .unwrap();

    match executor.await_all() {
        Err(Error::WorkerExecution { causes }) => {
            assert_eq!(causes.len(), 2);
            assert!(causes.iter().any(|c| c.contains("bad input")));
            assert!(causes.iter().any(|c| c.contains("worker blew up")));
        }
        other => panic!("expected WorkerExecution, got {other:?}"),
    }

    // Failures are drained by the first await.
    executor.await_all().unwrap();
}

#[test]
fn close_does_not_wait_and_last_worker_sets_end_time() {
    let (profiler, _sink) = test_profiler();
    let workers = pooled(&profiler, 2);
    let record = profiler.task_started(":app:package", ":app", None);

    let executor = workers.executor_for(":app:package");
    let counter = Arc::new(AtomicUsize::new(0));
    for n in 0..3 {
        executor.submit(counting_unit(&counter, n, 40)).unwrap();
    }
    executor.close().unwrap();
    assert_eq!(record.status(), TaskStatus::Closed);
    assert!(executor_is_busy(&counter, 3));

    executor.await_all().unwrap();
    // The task was closed, so awaiting on its behalf leaves it closed.
    assert_eq!(record.status(), TaskStatus::Closed);

    let end = record.end_time().expect("last worker should set end time");
    let last = record.last_worker_completion_time().unwrap();
    let close = record.close_time().unwrap();
    assert!(end >= last);
    assert!(end >= close);
}

#[test]
fn executor_keeps_the_pool_alive_after_workers_is_dropped() {
    let (profiler, sink) = test_profiler();
    let workers = pooled(&profiler, 1);
    profiler.task_started(":app:late", ":app", None);
    let executor = workers.executor_for(":app:late");
    drop(workers);

    let counter = Arc::new(AtomicUsize::new(0));
    executor.submit(counting_unit(&counter, 0, 1)).unwrap();
    executor.await_all().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(worker_spans(&sink), 1);
}

#[test]
fn unit_on_a_shut_down_runtime_is_reported_cancelled() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (profiler, _sink) = test_profiler();
    let workers = Workers::with_handle(
        ExecutionConfig::default(),
        Arc::clone(&profiler),
        runtime.handle().clone(),
    );
    let executor = workers.executor_for(":app:orphan");
    drop(runtime);

    let counter = Arc::new(AtomicUsize::new(0));
    executor.submit(counting_unit(&counter, 0, 0)).unwrap();
    match executor.await_all() {
        Err(Error::WorkerExecution { causes }) => {
            assert_eq!(causes.len(), 1);
            assert!(causes[0].contains("cancelled"));
        }
        other => panic!("expected WorkerExecution, got {other:?}"),
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

fn executor_is_busy(counter: &AtomicUsize, total: usize) -> bool {
    counter.load(Ordering::SeqCst) < total
}

#[test]
fn executor_for_untracked_owner_uses_null_entry() {
    let (profiler, sink) = test_profiler();
    let workers = pooled(&profiler, 1);

    let executor = workers.executor_for(":never:started");
    let counter = Arc::new(AtomicUsize::new(0));
    executor.submit(counting_unit(&counter, 0, 0)).unwrap();
    executor.close().unwrap();
    executor.await_all().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(sink.is_empty());
}

// ---------------------------------------------------------------------------
// Typed actions
// ---------------------------------------------------------------------------

struct Touch;

static TOUCHED: AtomicUsize = AtomicUsize::new(0);

impl WorkAction for Touch {
    type Params = usize;

    fn run(params: usize) -> UnitResult {
        TOUCHED.fetch_add(params, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn typed_actions_run_through_the_pool() {
    let (profiler, _sink) = test_profiler();
    let workers = pooled(&profiler, 2);
    profiler.task_started(":app:touch", ":app", None);

    let executor = workers.executor_for(":app:touch");
    executor.submit(WorkUnit::of::<Touch>(2)).unwrap();
    executor.submit(WorkUnit::of::<Touch>(3)).unwrap();
    executor.await_all().unwrap();

    assert_eq!(TOUCHED.load(Ordering::SeqCst), 5);
}

// ---------------------------------------------------------------------------
// Profiler
// ---------------------------------------------------------------------------

#[test]
fn task_without_workers_is_written_on_finish() {
    let (profiler, sink) = test_profiler();
    profiler.task_started(":app:assemble", ":app", None);

    assert!(profiler.task_finished(":app:assemble"));
    assert!(profiler.pending_tasks().is_empty());
    assert_eq!(sink.len(), 1);
    assert!(!profiler.task_finished(":app:assemble"));
}

#[test]
fn task_with_trailing_workers_is_written_once_they_finish() {
    let (profiler, sink) = test_profiler();
    let record = profiler.task_started(":app:merge", ":app", None);
    record.add_worker("w", ExecutionType::WorkerExecution);

    assert!(!profiler.task_finished(":app:merge"));
    assert_eq!(profiler.pending_tasks(), vec![":app:merge".to_string()]);
    assert_eq!(profiler.flush_completed(), 0);

    let worker = record.get("w");
    worker.execution_started();
    worker.execution_finished();
    record.worker_finished(&worker);

    assert_eq!(profiler.flush_completed(), 1);
    assert!(profiler.pending_tasks().is_empty());
    assert_eq!(sink.len(), 2);
}

#[test]
fn build_finished_writes_everything_left() {
    let (profiler, sink) = test_profiler();
    profiler.task_started(":a", ":", None);
    profiler.task_started(":b", ":", None).add_worker("w", ExecutionType::WorkerExecution);

    assert_eq!(profiler.build_finished(), 2);
    assert!(profiler.pending_tasks().is_empty());
    assert_eq!(sink.len(), 2);
    assert!(profiler.task_record(":a").is_null());
}
