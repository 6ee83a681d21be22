//! Lease and checkpoint store contracts
//!
//! The stores are external collaborators; this module defines the records
//! and the async contracts the partition manager consumes, plus in-memory
//! implementations for local runs and tests.

pub mod lease;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use lease::{Checkpoint, Lease, START_OF_STREAM};
pub use memory::{InMemoryCheckpointStore, InMemoryLeaseStore};

/// Store of one lease record per partition.
///
/// Acquisition is compare-and-set on the lease epoch: a caller presents the
/// record it last observed, and the store refuses the write if another host
/// has bumped the epoch since. At most one host holds a non-expired lease
/// for a partition at any instant.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Whether the backing store has been created
    async fn lease_store_exists(&self) -> Result<bool>;

    /// Create the backing store; succeeds if it already exists
    async fn create_lease_store_if_absent(&self) -> Result<()>;

    /// Create an unowned lease record for the partition if none exists
    async fn create_lease_if_absent(&self, partition_id: &str) -> Result<()>;

    /// Fetch every lease record. Records fail independently: a transient
    /// fault on one partition must not hide the others.
    async fn get_all_leases(&self) -> Vec<Result<Lease>>;

    /// Take ownership of the lease for `lease.owner`.
    ///
    /// Returns false when another host won the race (epoch moved since the
    /// caller observed this record). Works on expired leases and as a steal
    /// on live ones.
    async fn acquire_lease(&self, lease: &Lease) -> Result<bool>;

    /// Extend the lease expiry. Returns false when the caller no longer
    /// owns the lease.
    async fn renew_lease(&self, lease: &Lease) -> Result<bool>;

    /// Give up the lease, leaving the record unowned
    async fn release_lease(&self, lease: &Lease) -> Result<()>;

    /// Cadence at which owners must renew (strictly less than
    /// `lease_duration`)
    fn lease_renew_interval(&self) -> Duration;

    /// How long an acquired lease lives without renewal
    fn lease_duration(&self) -> Duration;
}

/// Store of one checkpoint record per partition.
///
/// Semantically independent from the lease store even when both land in the
/// same backing service. The partition manager only ensures records exist;
/// pumps advance them.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether the backing store has been created
    async fn checkpoint_store_exists(&self) -> Result<bool>;

    /// Create the backing store; succeeds if it already exists
    async fn create_checkpoint_store_if_absent(&self) -> Result<()>;

    /// Create a start-of-stream checkpoint for the partition if none exists
    async fn create_checkpoint_if_absent(&self, partition_id: &str) -> Result<()>;

    /// Fetch the checkpoint for a partition
    async fn get_checkpoint(&self, partition_id: &str) -> Result<Option<Checkpoint>>;

    /// Persist an advanced checkpoint
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}
