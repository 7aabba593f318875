//! Metric instrument factories for taskspan.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskspan"` meter; without
//! a provider they are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::model::ExecutionType;

/// Returns the shared meter for taskspan instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskspan")
}

/// `kind` label for span counters.
pub fn kind(execution_type: ExecutionType) -> KeyValue {
    KeyValue::new("kind", execution_type.to_string())
}

/// Counter: units of work submitted.
/// Labels: `backend` ("direct" | "pooled").
pub fn units_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskspan.units.submitted")
        .with_description("Number of units of work submitted")
        .build()
}

/// Counter: units of work that returned an error or panicked.
/// Labels: `backend`.
pub fn unit_failures() -> Counter<u64> {
    meter()
        .u64_counter("taskspan.units.failed")
        .with_description("Number of units of work that failed")
        .build()
}

/// Counter: spans handed to the record sink.
/// Labels: `kind`.
pub fn spans_written() -> Counter<u64> {
    meter()
        .u64_counter("taskspan.spans.written")
        .with_description("Number of spans written to the record sink")
        .build()
}

/// Histogram: effective task duration in milliseconds.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskspan.task.duration_ms")
        .with_description("Task duration including trailing workers")
        .with_unit("ms")
        .build()
}

/// Histogram: time a unit waited between submission and execution.
pub fn worker_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskspan.worker.wait_ms")
        .with_description("Worker queueing delay")
        .with_unit("ms")
        .build()
}
