//! Shared worker pool
//!
//! One spawn surface for the reconciliation loop and the pumps. The pool
//! can be closed to new work during shutdown while tasks already running
//! drain on their own; nothing ever joins the pool from inside it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BallastError, Result};

/// Configuration for a pool-owned runtime
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker threads for the runtime
    pub worker_threads: usize,
    /// Thread name prefix
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(4),
            thread_name: "ballast-worker".into(),
        }
    }
}

/// Handle to the host's shared worker pool
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Wrap the runtime the caller is already inside
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// Wrap an existing runtime handle
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build a dedicated runtime for hosts that do not bring their own.
    ///
    /// The caller keeps the returned `Runtime` alive for the life of the
    /// pool; dropping it tears down every task.
    pub fn owned(config: PoolConfig) -> Result<(Self, Runtime)> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name)
            .enable_all()
            .build()
            .map_err(|e| BallastError::Internal {
                message: format!("Failed to create worker runtime: {}", e),
            })?;

        let pool = Self::from_handle(runtime.handle().clone());
        Ok((pool, runtime))
    }

    /// Spawn a task, unless the pool has been closed to new work
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(BallastError::ShutdownInProgress);
        }
        Ok(self.handle.spawn(future))
    }

    /// Refuse all new work from this point on.
    ///
    /// Tasks already running are unaffected; the shutdown path awaits the
    /// ones it cares about individually.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Worker pool closed to new work");
        }
    }

    /// Whether the pool refuses new work
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
