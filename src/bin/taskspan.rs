//! taskspan CLI: drive a synthetic build through the ledger, or summarize a
//! span file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use taskspan::config::Config;
use taskspan::dispatch::{WorkExecutor, WorkUnit, Workers};
use taskspan::model::{ExecutionType, SpanRecord};
use taskspan::profiler::Profiler;
use taskspan::sink::{JsonLinesSink, MemorySink, RecordSink, read_records};
use taskspan::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "taskspan", about = "Task timing ledger and work dispatch")]
struct Cli {
    /// TOML config file. Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a synthetic build: a chain of tasks, each fanning out into units
    Simulate {
        /// Number of tasks in the chain
        #[arg(long, default_value_t = 4)]
        tasks: usize,
        /// Units submitted per task
        #[arg(long, default_value_t = 8)]
        units: usize,
        /// Base sleep per unit, in milliseconds
        #[arg(long, default_value_t = 20)]
        unit_ms: u64,
        /// Force the worker pool backend
        #[arg(long, conflicts_with = "direct")]
        pool: bool,
        /// Force direct execution on the calling thread
        #[arg(long)]
        direct: bool,
        /// Write span records to this JSON-lines file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Summarize a JSON-lines span file
    Summarize {
        /// Span file written by `simulate` or any JSON-lines sink
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::from_toml_file(path)?,
        None => Config::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "taskspan".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Simulate {
            tasks,
            units,
            unit_ms,
            pool,
            direct,
            output,
        } => {
            if pool {
                config.use_worker_pool = true;
            } else if direct {
                config.use_worker_pool = false;
            }
            if output.is_some() {
                config.span_output = output;
            }
            cmd_simulate(&config, tasks, units, unit_ms)
        }
        Command::Summarize { file } => cmd_summarize(file),
    }
}

fn cmd_simulate(config: &Config, tasks: usize, units: usize, unit_ms: u64) -> anyhow::Result<()> {
    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn RecordSink> = match config.span_output {
        Some(ref path) => Arc::new(JsonLinesSink::open(path)?),
        None => memory.clone(),
    };

    let profiler = Arc::new(Profiler::with_system_clock(sink));
    let workers = Workers::new(config.execution(), Arc::clone(&profiler))?;
    println!(
        "Build {} ({} backend)",
        profiler.build_id(),
        if workers.uses_worker_pool() { "pooled" } else { "direct" }
    );

    // Each task depends on the previous one, so it awaits the upstream
    // executor before its own body runs.
    let mut upstream: Option<Box<dyn WorkExecutor>> = None;
    for t in 0..tasks {
        if let Some(previous) = upstream.take() {
            previous.await_all()?;
        }

        let task_path = format!(":app:step{t}");
        profiler.task_started(&task_path, ":app", Some("debug"));
        let executor = workers.executor_for(&task_path);
        for u in 0..units {
            let sleep = Duration::from_millis(unit_ms + (u as u64 % 3) * unit_ms / 2);
            executor.submit(WorkUnit::new("Sleep", (t, u), move |_| {
                std::thread::sleep(sleep);
                Ok(())
            }))?;
        }
        executor.close()?;
        profiler.task_finished(&task_path);
        upstream = Some(executor);
    }
    if let Some(last) = upstream {
        last.await_all()?;
    }

    profiler.flush_completed();
    profiler.build_finished();

    let records = match config.span_output {
        Some(ref path) => {
            println!("Spans written to {}", path.display());
            read_records(path)?
        }
        None => memory.records(),
    };
    print_summary(&records);
    Ok(())
}

fn cmd_summarize(file: PathBuf) -> anyhow::Result<()> {
    let records = read_records(&file)?;
    if records.is_empty() {
        println!("No span records found.");
        return Ok(());
    }
    print_summary(&records);
    Ok(())
}

fn print_summary(records: &[SpanRecord]) {
    let mut workers_by_parent: HashMap<u64, (usize, i64)> = HashMap::new();
    for record in records {
        if record.span.execution_type == ExecutionType::TaskExecution {
            continue;
        }
        if let Some(parent) = record.span.parent_id {
            let entry = workers_by_parent.entry(parent.0).or_default();
            entry.0 += 1;
            entry.1 += record.span.duration_ms;
        }
    }

    println!(
        "{:<6}  {:<24}  {:<8}  {:>8}  {:>12}  {:>12}",
        "ID", "TASK", "VARIANT", "WORKERS", "WORKER_MS", "DURATION_MS"
    );
    println!("{}", "-".repeat(80));

    let mut task_count = 0;
    for record in records
        .iter()
        .filter(|r| r.span.execution_type == ExecutionType::TaskExecution)
    {
        task_count += 1;
        let id = record.span.id.map(|id| id.0).unwrap_or_default();
        let (workers, worker_ms) = workers_by_parent.get(&id).copied().unwrap_or_default();
        println!(
            "{:<6}  {:<24}  {:<8}  {:>8}  {:>12}  {:>12}",
            id,
            record.span.task_path.as_deref().unwrap_or("-"),
            record.variant.as_deref().unwrap_or("-"),
            workers,
            worker_ms,
            record.span.duration_ms
        );
    }

    println!("\n{task_count} task(s), {} record(s)", records.len());
}
