//! Record sinks: where finalized spans go.
//!
//! A sink is shared by every task record in the process, so each
//! implementation serializes its own writes. Span ids come from the sink
//! that will persist them.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Span, SpanId, SpanRecord};

/// Durable destination for finalized spans.
pub trait RecordSink: Send + Sync {
    /// Hand out a fresh span id.
    fn allocate_id(&self) -> SpanId;

    /// Persist one span together with its children.
    fn write(
        &self,
        project_path: &str,
        variant: Option<&str>,
        span: &Span,
        children: &[Span],
    ) -> Result<()>;
}

/// Monotonic id source shared by the sink implementations. Ids start at 1.
#[derive(Debug, Default)]
struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Allocator whose first id follows `last`.
    fn after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    fn next(&self) -> SpanId {
        SpanId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn to_record(project_path: &str, variant: Option<&str>, span: &Span, children: &[Span]) -> SpanRecord {
    SpanRecord {
        project_path: project_path.to_string(),
        variant: variant.map(str::to_string),
        span: span.clone(),
        children: children.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps every record in memory. Used by tests and by `taskspan simulate`
/// when no output file is configured.
#[derive(Debug, Default)]
pub struct MemorySink {
    ids: IdAllocator,
    records: Mutex<Vec<SpanRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far, in write order.
    pub fn records(&self) -> Vec<SpanRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn allocate_id(&self) -> SpanId {
        self.ids.next()
    }

    fn write(
        &self,
        project_path: &str,
        variant: Option<&str>,
        span: &Span,
        children: &[Span],
    ) -> Result<()> {
        self.records
            .lock()
            .push(to_record(project_path, variant, span, children));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Appends one JSON object per record to a file, flushing after each write.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    ids: IdAllocator,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending. Ids continue after the
    /// largest one already in the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let last = if path.exists() {
            last_id(&read_records(&path)?)
        } else {
            0
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), last, "span file opened");
        Ok(Self {
            path,
            ids: IdAllocator::after(last),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonLinesSink {
    fn allocate_id(&self) -> SpanId {
        self.ids.next()
    }

    fn write(
        &self,
        project_path: &str,
        variant: Option<&str>,
        span: &Span,
        children: &[Span],
    ) -> Result<()> {
        let line = serde_json::to_string(&to_record(project_path, variant, span, children))?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

fn last_id(records: &[SpanRecord]) -> u64 {
    records
        .iter()
        .flat_map(|r| std::iter::once(&r.span).chain(&r.children))
        .filter_map(|span| span.id.map(|id| id.0))
        .max()
        .unwrap_or(0)
}

/// Read back every record from a JSON-lines span file. Blank lines are skipped.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<SpanRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Emits each record as a `tracing` event, which the OTel log bridge
/// forwards when an OTLP endpoint is configured.
#[derive(Debug, Default)]
pub struct TracingSink {
    ids: IdAllocator,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for TracingSink {
    fn allocate_id(&self) -> SpanId {
        self.ids.next()
    }

    fn write(
        &self,
        project_path: &str,
        variant: Option<&str>,
        span: &Span,
        children: &[Span],
    ) -> Result<()> {
        info!(
            target: "taskspan::record",
            project = project_path,
            variant = variant.unwrap_or("-"),
            span.id = span.id.map(|id| id.0),
            span.parent_id = span.parent_id.map(|id| id.0),
            span.execution_type = %span.execution_type,
            span.start_time_ms = span.start_time_ms,
            span.duration_ms = span.duration_ms,
            children = children.len(),
            "span recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionType;
    use chrono::{DateTime, TimeDelta, Utc};

    #[test]
    fn ids_are_unique_and_start_at_one() {
        let sink = MemorySink::new();
        assert_eq!(sink.allocate_id(), SpanId(1));
        assert_eq!(sink.allocate_id(), SpanId(2));
        assert_eq!(sink.allocate_id(), SpanId(3));
    }

    #[test]
    fn tracing_sink_accepts_writes() {
        let sink = TracingSink::new();
        let span = Span::new(
            ExecutionType::WorkerExecution,
            DateTime::<Utc>::UNIX_EPOCH,
            TimeDelta::milliseconds(5),
        )
        .with_id(sink.allocate_id());
        sink.write(":app", None, &span, &[]).unwrap();
    }
}
