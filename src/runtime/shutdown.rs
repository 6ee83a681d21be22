//! Shutdown signaling
//!
//! Broadcast-based stop signal. Late subscribers that missed the send can
//! still observe `is_triggered`, so checking the flag before waiting is
//! the safe pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// One-way shutdown trigger shared across tasks
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<broadcast::Sender<()>>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender: Arc::new(sender),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fire the signal. Safe to call more than once.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        let _ = self.sender.send(());
    }

    /// Whether the signal has already fired
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// New receiver; sees sends made after this call
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
