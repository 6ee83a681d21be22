//! Metrics for monitoring
//!
//! Atomic counts of lease ownership and loop health, rendered in
//! Prometheus text format for the host to serve however it likes.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic event count
pub struct Counter(AtomicU64);

impl Counter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Record one occurrence
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Point-in-time level, overwritten wholesale by each loop iteration
pub struct Gauge(AtomicI64);

impl Gauge {
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Replace with the latest observation
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Standard Ballast metrics
pub mod standard {
    use super::{Counter, Gauge};

    /// Leases this host held at the end of the last iteration
    pub static OWNED_LEASES: Gauge = Gauge::new();

    /// Pumps currently running
    pub static RUNNING_PUMPS: Gauge = Gauge::new();

    /// Expired leases acquired
    pub static LEASES_ACQUIRED: Counter = Counter::new();

    /// Leases stolen for balancing
    pub static LEASES_STOLEN: Counter = Counter::new();

    /// Renewals that came back lost or errored
    pub static RENEW_FAILURES: Counter = Counter::new();

    /// Reconciliation passes completed
    pub static LOOP_ITERATIONS: Counter = Counter::new();
}

/// Render every standard metric in Prometheus text format
pub fn gather_system_metrics() -> String {
    let mut out = String::new();

    expose(
        &mut out,
        "ballast_owned_leases",
        "gauge",
        "Leases owned by this host",
        standard::OWNED_LEASES.get(),
    );
    expose(
        &mut out,
        "ballast_running_pumps",
        "gauge",
        "Pumps currently running",
        standard::RUNNING_PUMPS.get(),
    );
    expose(
        &mut out,
        "ballast_leases_acquired_total",
        "counter",
        "Expired leases acquired",
        standard::LEASES_ACQUIRED.get(),
    );
    expose(
        &mut out,
        "ballast_leases_stolen_total",
        "counter",
        "Leases stolen for balancing",
        standard::LEASES_STOLEN.get(),
    );
    expose(
        &mut out,
        "ballast_renew_failures_total",
        "counter",
        "Lease renewals lost or errored",
        standard::RENEW_FAILURES.get(),
    );
    expose(
        &mut out,
        "ballast_loop_iterations_total",
        "counter",
        "Reconciliation loop iterations",
        standard::LOOP_ITERATIONS.get(),
    );

    out
}

fn expose(out: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    let _ = writeln!(out, "{} {}", name, value);
}
