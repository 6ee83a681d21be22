//! Error-notification channel
//!
//! Hosts register a notifier to observe recovered errors the manager
//! does not surface through return values.

use std::fmt;

use tokio::sync::mpsc;
use tracing::error;

/// Partition id reported when an error is not tied to any partition
pub const NO_ASSOCIATED_PARTITION: &str = "N/A";

/// Identifies which logical operation an error notification came from.
///
/// The set is closed and stable; hosts may match on it to route alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreatingLeaseStore,
    CreatingLease,
    CreatingCheckpointStore,
    CreatingCheckpoint,
    CheckingLeases,
    StealingLease,
    PartitionManagerMainLoop,
    PartitionManagerCleanup,
}

impl Action {
    /// Wire form of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreatingLeaseStore => "CreatingLeaseStore",
            Action::CreatingLease => "CreatingLease",
            Action::CreatingCheckpointStore => "CreatingCheckpointStore",
            Action::CreatingCheckpoint => "CreatingCheckpoint",
            Action::CheckingLeases => "CheckingLeases",
            Action::StealingLease => "StealingLease",
            Action::PartitionManagerMainLoop => "PartitionManagerMainLoop",
            Action::PartitionManagerCleanup => "PartitionManagerCleanup",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recovered error, as delivered to the host
#[derive(Debug, Clone)]
pub struct ErrorNotification {
    /// Host that observed the error
    pub host_name: String,
    /// Operation that failed
    pub action: Action,
    /// Partition the error relates to, if any
    pub partition_id: Option<String>,
    /// Rendered error
    pub message: String,
}

impl ErrorNotification {
    /// Partition id in wire form, with the sentinel for none
    pub fn partition_or_sentinel(&self) -> &str {
        self.partition_id.as_deref().unwrap_or(NO_ASSOCIATED_PARTITION)
    }
}

/// Sink for recovered errors. Implementations must not block.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, notification: ErrorNotification);
}

/// Notifier that logs every notification at error level
pub struct TracingNotifier;

impl ErrorNotifier for TracingNotifier {
    fn notify(&self, n: ErrorNotification) {
        error!(
            "Host {} error during {} on partition {}: {}",
            n.host_name,
            n.action,
            n.partition_or_sentinel(),
            n.message
        );
    }
}

/// Notifier that forwards notifications over an unbounded channel
///
/// Used by hosts that consume notifications programmatically, and by tests.
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ErrorNotification>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving half
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ErrorNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ErrorNotifier for ChannelNotifier {
    fn notify(&self, n: ErrorNotification) {
        // Receiver may be gone during shutdown; nothing to do then.
        let _ = self.sender.send(n);
    }
}
