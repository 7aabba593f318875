//! Runs units on the calling thread.

use opentelemetry::KeyValue;
use tracing::debug;

use crate::dispatch::{WorkExecutor, WorkUnit};
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Executor that runs each unit inside `submit`. `await_all` and `close`
/// have nothing to do. Deterministic, so it suits tests.
#[derive(Debug, Clone)]
pub struct DirectExecutor {
    owner: String,
}

impl DirectExecutor {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}

impl WorkExecutor for DirectExecutor {
    fn submit(&self, unit: WorkUnit) -> Result<()> {
        let backend = [KeyValue::new("backend", "direct")];
        metrics::units_submitted().add(1, &backend);
        debug!(owner = %self.owner, action = unit.action(), "running unit inline");

        let action = unit.action().to_string();
        unit.run().map_err(|e| {
            metrics::unit_failures().add(1, &backend);
            Error::WorkUnit {
                action,
                message: format!("{e:#}"),
            }
        })
    }

    fn await_all(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
