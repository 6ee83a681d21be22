//! Lease and checkpoint records

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Offset marking the beginning of a partition's stream
pub const START_OF_STREAM: &str = "-1";

/// A time-bounded claim over one partition.
///
/// The `epoch` is the store's validation token: it moves forward on every
/// successful acquire, so a compare-and-set against it detects ownership
/// changes that happened after this copy was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Partition this lease covers
    pub partition_id: String,
    /// Host currently holding the lease; empty when unowned
    pub owner: String,
    /// Instant at which the claim lapses
    pub expires_at: DateTime<Utc>,
    /// Ownership generation, bumped by the store on each acquire
    pub epoch: u64,
}

impl Lease {
    /// A fresh, unowned record for a partition
    pub fn unowned(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            owner: String::new(),
            // Epoch zero of the wall clock: always in the past
            expires_at: Utc.timestamp_opt(0, 0).unwrap(),
            epoch: 0,
        }
    }

    /// Whether the claim has lapsed as of `now`. Unowned records count as
    /// expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.owner.is_empty() || self.expires_at <= now
    }

    /// Whether `host_name` holds this lease
    pub fn is_owned_by(&self, host_name: &str) -> bool {
        !self.owner.is_empty() && self.owner == host_name
    }
}

/// Position of a consumer within one partition's stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Partition this checkpoint covers
    pub partition_id: String,
    /// Opaque stream offset
    pub offset: String,
    /// Monotonic sequence number of the last processed event
    pub sequence_number: i64,
}

impl Checkpoint {
    /// A checkpoint pointing at the beginning of the stream
    pub fn start_of_stream(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            offset: START_OF_STREAM.into(),
            sequence_number: 0,
        }
    }
}
