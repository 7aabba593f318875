//! Work dispatch: one façade over a direct and a pooled backend.
//!
//! Tasks obtain a [`WorkExecutor`] from [`Workers`], submit [`WorkUnit`]s
//! through it, and either wait for them with `await_all` or hand control
//! back with `close` and let a dependent task's `await_all` be the
//! synchronization point.

pub mod direct;
pub mod pooled;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tracing::info;

use crate::config::ExecutionConfig;
use crate::error::{Error, Result};
use crate::profiler::Profiler;

pub use direct::DirectExecutor;
pub use pooled::PooledExecutor;

/// What a unit of work returns.
pub type UnitResult = anyhow::Result<()>;

/// Submit / wait / release, regardless of backend.
pub trait WorkExecutor: Send + Sync {
    /// Queue (or run) one unit of work.
    fn submit(&self, unit: WorkUnit) -> Result<()>;

    /// Block until every unit submitted through this executor completed.
    fn await_all(&self) -> Result<()>;

    /// The owning task is giving control back to the scheduler. Does not
    /// wait for outstanding units.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Work units
// ---------------------------------------------------------------------------

/// A typed action that can be turned into a [`WorkUnit`].
pub trait WorkAction: 'static {
    type Params: Hash + Send + 'static;

    fn run(params: Self::Params) -> UnitResult;

    /// Identity used in worker keys.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// One unit of work: an action name, the hash of its parameters, and the
/// closure that runs it.
pub struct WorkUnit {
    action: String,
    params_hash: u64,
    run: Box<dyn FnOnce() -> UnitResult + Send + 'static>,
}

impl WorkUnit {
    pub fn new<P, F>(action: impl Into<String>, params: P, run: F) -> Self
    where
        P: Hash + Send + 'static,
        F: FnOnce(P) -> UnitResult + Send + 'static,
    {
        let mut hasher = DefaultHasher::new();
        params.hash(&mut hasher);
        Self {
            action: action.into(),
            params_hash: hasher.finish(),
            run: Box::new(move || run(params)),
        }
    }

    pub fn of<A: WorkAction>(params: A::Params) -> Self {
        Self::new(A::name(), params, A::run)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params_hash(&self) -> u64 {
        self.params_hash
    }

    /// Worker key for this unit when submitted by `owner`.
    pub fn key_for(&self, owner: &str) -> String {
        worker_key(owner, &self.action, self.params_hash)
    }

    pub(crate) fn run(self) -> UnitResult {
        (self.run)()
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("action", &self.action)
            .field("params_hash", &self.params_hash)
            .finish_non_exhaustive()
    }
}

/// Owner path, action identity and parameter hash, concatenated.
pub fn worker_key(owner: &str, action: &str, params_hash: u64) -> String {
    format!("{owner}{action}{params_hash}")
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

enum Backend {
    Direct,
    Pooled {
        handle: Handle,
        // Set when `Workers::new` built the runtime; shared with every
        // executor so submissions never outlive it.
        runtime: Option<Arc<Runtime>>,
    },
}

/// Hands out executors for tasks. The backend is chosen once, when this is
/// built.
pub struct Workers {
    profiler: Arc<Profiler>,
    backend: Backend,
}

impl Workers {
    /// Select the backend from `config`. The pooled backend gets its own
    /// runtime whose blocking pool is capped at `worker_threads`.
    pub fn new(config: ExecutionConfig, profiler: Arc<Profiler>) -> Result<Self> {
        if !config.use_worker_pool {
            return Ok(Self::direct(profiler));
        }

        if config.worker_threads == Some(0) {
            return Err(Error::Config("worker_threads must be at least 1".to_string()));
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .worker_threads(1)
            .thread_name("taskspan-worker")
            .enable_all();
        if let Some(n) = config.worker_threads {
            builder.max_blocking_threads(n);
        }
        let runtime = builder.build()?;
        info!(threads = ?config.worker_threads, "using pooled work executor");
        Ok(Self {
            profiler,
            backend: Backend::Pooled {
                handle: runtime.handle().clone(),
                runtime: Some(Arc::new(runtime)),
            },
        })
    }

    /// Like [`Workers::new`], but the pooled backend runs on an existing
    /// runtime.
    pub fn with_handle(config: ExecutionConfig, profiler: Arc<Profiler>, handle: Handle) -> Self {
        if !config.use_worker_pool {
            return Self::direct(profiler);
        }
        Self {
            profiler,
            backend: Backend::Pooled {
                handle,
                runtime: None,
            },
        }
    }

    pub fn direct(profiler: Arc<Profiler>) -> Self {
        Self {
            profiler,
            backend: Backend::Direct,
        }
    }

    pub fn uses_worker_pool(&self) -> bool {
        matches!(self.backend, Backend::Pooled { .. })
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    /// Executor for the task at `owner`.
    pub fn executor_for(&self, owner: &str) -> Box<dyn WorkExecutor> {
        match &self.backend {
            Backend::Direct => Box::new(DirectExecutor::new(owner)),
            Backend::Pooled {
                runtime: Some(runtime),
                ..
            } => Box::new(PooledExecutor::on_runtime(
                owner,
                self.profiler.task_record(owner),
                Arc::clone(runtime),
            )),
            Backend::Pooled { handle, .. } => Box::new(PooledExecutor::new(
                owner,
                self.profiler.task_record(owner),
                handle.clone(),
            )),
        }
    }
}
