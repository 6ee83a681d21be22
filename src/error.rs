//! Error types for Ballast
//!
//! Error taxonomy covering the lease store, the checkpoint store,
//! pump supervision, and the partition manager runtime.

use thiserror::Error;

use crate::notify::Action;

/// Primary error type for all Ballast operations
#[derive(Debug, Error)]
pub enum BallastError {
    // ========== Store Errors ==========

    /// A lease or checkpoint store round-trip failed
    #[error("Store operation failed: {message}")]
    StoreUnavailable { message: String },

    /// No lease record exists for the partition
    #[error("No lease found for partition {partition_id}")]
    LeaseNotFound { partition_id: String },

    /// No checkpoint record exists for the partition
    #[error("No checkpoint found for partition {partition_id}")]
    CheckpointNotFound { partition_id: String },

    /// Store initialization step exhausted its retry budget
    #[error("Out of retries during {action}: {message}")]
    InitFailure { action: Action, message: String },

    // ========== Lease Errors ==========

    /// Renew was presented with a lease token the store no longer honors
    #[error("Stale lease epoch for partition {partition_id}: held {held}, store has {current}")]
    StaleLeaseEpoch {
        partition_id: String,
        held: u64,
        current: u64,
    },

    // ========== Pump Errors ==========

    /// A pump failed to open or run for its partition
    #[error("Pump failure on partition {partition_id}: {message}")]
    PumpFailure {
        partition_id: String,
        message: String,
    },

    // ========== Runtime Errors ==========

    /// The worker pool is closed and accepts no new work
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BallastError {
    /// Returns true if this error is worth retrying against the store
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BallastError::StoreUnavailable { .. } | BallastError::StaleLeaseEpoch { .. }
        )
    }
}

/// Result type alias for Ballast operations
pub type Result<T> = std::result::Result<T, BallastError>;
