//! Task and unit execution span helpers.

use tracing::Span;

/// Start a span covering a task body, from `task_started` to `task_finished`.
pub fn start_task_span(task_path: &str, project_path: &str) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.path" = task_path,
        "task.project" = project_path,
        "task.duration_ms" = tracing::field::Empty,
    )
}

/// Start a span for one unit running on a pool thread.
pub fn start_unit_span(owner: &str, action: &str, key: &str) -> Span {
    tracing::info_span!(
        "unit.execute",
        "unit.owner" = owner,
        "unit.action" = action,
        "unit.key" = key,
        "unit.outcome" = tracing::field::Empty,
    )
}

/// Record how a unit ended on its span.
pub fn record_unit_outcome(span: &Span, ok: bool) {
    span.record("unit.outcome", if ok { "ok" } else { "error" });
}

/// Record the effective task duration on a task span.
pub fn record_task_duration(span: &Span, duration_ms: i64) {
    span.record("task.duration_ms", duration_ms);
}
