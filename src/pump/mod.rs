//! Pump supervision
//!
//! A pump is the running subscriber for one partition, driven by the lease
//! that host currently holds. The supervisor owns the set of running pumps
//! and exposes the idempotent add/remove surface the partition manager
//! reconciles against. The pump body itself is supplied by the host.

pub mod supervisor;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::{BallastError, Result};
use crate::store::Lease;

pub use supervisor::TaskPumpSupervisor;

/// Why a pump is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloseReason {
    /// The host lost the lease for this partition
    LeaseLost,
    /// The host is shutting down
    Shutdown,
}

/// The per-partition subscriber body, implemented by the host.
///
/// The supervisor calls `open` once, `lease_updated` on every renewal the
/// manager observes, and `close` exactly once at the end.
#[async_trait]
pub trait PartitionPump: Send {
    /// Bind to the partition and start receiving
    async fn open(&mut self, lease: &Lease) -> Result<()>;

    /// The manager renewed or re-acquired the lease; adopt the new copy
    async fn lease_updated(&mut self, lease: &Lease);

    /// Release the subscriber. After this resolves the partition is safe
    /// to reacquire.
    async fn close(&mut self, reason: CloseReason);
}

/// Creates pump bodies on demand
pub trait PumpFactory: Send + Sync {
    fn create(&self, partition_id: &str) -> Box<dyn PartitionPump>;
}

/// Set of running pumps, reconciled by the partition manager each
/// iteration
#[async_trait]
pub trait PumpSupervisor: Send + Sync {
    /// Ensure a pump runs for the partition under `lease`.
    ///
    /// Idempotent: an already-running pump has the fresh lease swapped in;
    /// otherwise a new pump is started.
    async fn add_pump(&self, partition_id: &str, lease: Lease);

    /// Stop the pump for a partition.
    ///
    /// Returns `None` when no pump is running (a no-op by contract), or a
    /// removal handle that resolves once the pump has fully released its
    /// subscriber.
    async fn remove_pump(&self, partition_id: &str, reason: CloseReason) -> Option<PumpRemoval>;

    /// Stop every pump, returning one removal handle per pump that was
    /// running
    async fn remove_all_pumps(&self, reason: CloseReason) -> Vec<PumpRemoval>;

    /// Partitions with a pump currently running
    async fn running_partitions(&self) -> Vec<String>;
}

/// Completion handle for one pump teardown
pub struct PumpRemoval {
    partition_id: String,
    handle: JoinHandle<()>,
}

impl PumpRemoval {
    pub(crate) fn new(partition_id: String, handle: JoinHandle<()>) -> Self {
        Self { partition_id, handle }
    }

    /// Partition whose pump is being removed
    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Wait until the pump has fully closed
    pub async fn wait(self) -> Result<()> {
        self.handle.await.map_err(|e| BallastError::PumpFailure {
            partition_id: self.partition_id,
            message: format!("pump task did not complete: {}", e),
        })
    }
}
