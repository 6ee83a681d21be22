//! Worker pool and shutdown signaling
//!
//! The host owns one shared pool; the reconciliation loop and every pump
//! run on it.

pub mod pool;
pub mod shutdown;

pub use pool::{PoolConfig, WorkerPool};
pub use shutdown::ShutdownSignal;
