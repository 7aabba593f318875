//! # taskspan
//!
//! Timing ledger and work dispatch for build tasks that fan out into
//! concurrent units of work.
//!
//! A [`profiler::Profiler`] keeps one [`ledger::TaskRecord`] per running
//! task. Tasks submit units through a [`dispatch::WorkExecutor`] obtained
//! from [`dispatch::Workers`]; the pooled backend books every unit into the
//! owner's record. When a task is finished and its workers are done, the
//! record writes one task span and one span per worker to a
//! [`sink::RecordSink`].

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod profiler;
pub mod sink;
pub mod telemetry;
