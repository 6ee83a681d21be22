//! Partition manager
//!
//! Owns the reconciliation loop for one host: renew what we hold, acquire
//! what has lapsed, steal at most one lease per pass to level the load,
//! and keep the pump set matched to the leases we hold.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::balancer;
use crate::error::{BallastError, Result};
use crate::metrics::standard as metrics;
use crate::notify::{Action, ErrorNotification, ErrorNotifier};
use crate::pump::{CloseReason, PumpSupervisor};
use crate::runtime::{ShutdownSignal, WorkerPool};
use crate::store::{CheckpointStore, Lease, LeaseStore};
use crate::INIT_RETRY_ATTEMPTS;

/// Configuration for the partition manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Identity of this host; must be unique across the cluster
    pub host_name: String,
}

/// Per-iteration view of every lease the host has an opinion on.
///
/// Built fresh each pass and dropped at the end of it; the stores hold the
/// authoritative state.
#[derive(Default)]
struct LeaseSnapshot {
    /// Leases we verified or took this pass, keyed by partition
    ours: HashMap<String, Lease>,
    /// Leases other hosts hold, in enumeration order
    others: Vec<Lease>,
}

impl LeaseSnapshot {
    fn record_ours(&mut self, lease: Lease) {
        self.ours.insert(lease.partition_id.clone(), lease);
    }

    fn record_theirs(&mut self, lease: Lease) {
        self.others.push(lease);
    }

    fn promote(&mut self, lease: Lease) {
        self.others.retain(|l| l.partition_id != lease.partition_id);
        self.record_ours(lease);
    }
}

/// The orchestrator: one per host process
pub struct PartitionManager {
    config: ManagerConfig,
    partition_ids: Vec<String>,
    lease_store: Arc<dyn LeaseStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    pumps: Arc<dyn PumpSupervisor>,
    notifier: Arc<dyn ErrorNotifier>,
    pool: WorkerPool,
    stop: AtomicBool,
    shutdown: ShutdownSignal,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    // Handle to ourselves for the spawned loop task
    weak_self: Weak<PartitionManager>,
}

impl PartitionManager {
    /// Create a manager for the given partition set.
    ///
    /// The partition id list is read once from the stream runtime and
    /// cached for the life of the process; repartitioning requires a
    /// restart.
    pub fn new(
        config: ManagerConfig,
        partition_ids: Vec<String>,
        lease_store: Arc<dyn LeaseStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        pumps: Arc<dyn PumpSupervisor>,
        notifier: Arc<dyn ErrorNotifier>,
        pool: WorkerPool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            config,
            partition_ids,
            lease_store,
            checkpoint_store,
            pumps,
            notifier,
            pool,
            stop: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
            loop_task: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// This host's identity
    pub fn host_name(&self) -> &str {
        &self.config.host_name
    }

    /// Prepare the stores and start the reconciliation loop.
    ///
    /// Fails fast: if any store prerequisite cannot be created within the
    /// retry budget the loop is never scheduled, no pump exists, and the
    /// error carries the action tag of the step that failed.
    pub async fn initialize(&self) -> Result<()> {
        if let Err(e) = self.initialize_stores().await {
            error!(
                "Host {} failed initializing stores, not starting partition manager: {}",
                self.config.host_name, e
            );
            return Err(e);
        }

        let manager = self.weak_self.upgrade().ok_or(BallastError::ShutdownInProgress)?;
        let handle = self.pool.spawn(async move { manager.run_and_clean_up().await })?;
        *self.loop_task.lock().await = Some(handle);

        info!("Host {} partition manager started", self.config.host_name);
        Ok(())
    }

    /// Ask the loop to stop at its next opportunity.
    ///
    /// Returns the loop task's completion handle; awaiting it observes the
    /// end of pump cleanup. `None` when the loop was never started or was
    /// already stopped.
    pub async fn stop_partitions(&self) -> Option<JoinHandle<()>> {
        self.stop.store(true, Ordering::Release);
        self.shutdown.trigger();
        self.loop_task.lock().await.take()
    }

    async fn initialize_stores(&self) -> Result<()> {
        if !self.lease_store.lease_store_exists().await? {
            self.retry_init(
                || self.lease_store.create_lease_store_if_absent(),
                None,
                "Failure creating lease store, retrying",
                "Out of retries creating lease store",
                Action::CreatingLeaseStore,
            )
            .await?;
        }

        for id in &self.partition_ids {
            self.retry_init(
                || self.lease_store.create_lease_if_absent(id),
                Some(id),
                "Failure creating lease for partition, retrying",
                "Out of retries creating lease for partition",
                Action::CreatingLease,
            )
            .await?;
        }

        if !self.checkpoint_store.checkpoint_store_exists().await? {
            self.retry_init(
                || self.checkpoint_store.create_checkpoint_store_if_absent(),
                None,
                "Failure creating checkpoint store, retrying",
                "Out of retries creating checkpoint store",
                Action::CreatingCheckpointStore,
            )
            .await?;
        }

        for id in &self.partition_ids {
            self.retry_init(
                || self.checkpoint_store.create_checkpoint_if_absent(id),
                Some(id),
                "Failure creating checkpoint for partition, retrying",
                "Out of retries creating checkpoint for partition",
                Action::CreatingCheckpoint,
            )
            .await?;
        }

        Ok(())
    }

    /// Run one initialization step with the fixed retry budget: up to
    /// [`INIT_RETRY_ATTEMPTS`] full round-trips, back to back. Exhausting
    /// the budget is fatal and tagged with the failing step.
    async fn retry_init<F, Fut>(
        &self,
        op: F,
        partition_id: Option<&str>,
        retry_message: &str,
        failure_message: &str,
        action: Action,
    ) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut last_error = None;

        for attempt in 1..=INIT_RETRY_ATTEMPTS {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    match partition_id {
                        Some(id) => warn!(
                            "Host {} {} (partition {}, attempt {}/{}): {}",
                            self.config.host_name, retry_message, id, attempt, INIT_RETRY_ATTEMPTS, e
                        ),
                        None => warn!(
                            "Host {} {} (attempt {}/{}): {}",
                            self.config.host_name, retry_message, attempt, INIT_RETRY_ATTEMPTS, e
                        ),
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("Host {} {}", self.config.host_name, failure_message);
        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into());
        Err(BallastError::InitFailure {
            action,
            message: format!("{}: {}", failure_message, cause),
        })
    }

    async fn run_and_clean_up(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();

        match self.run_loop(&mut shutdown_rx).await {
            Ok(()) => info!(
                "Host {} partition manager main loop exited normally, shutting down",
                self.config.host_name
            ),
            Err(e) => {
                error!(
                    "Host {} partition manager main loop failed, shutting down: {}",
                    self.config.host_name, e
                );
                self.report(Action::PartitionManagerMainLoop, None, &e);
            }
        }

        debug!("Host {} shutting down all pumps", self.config.host_name);
        let removals = self.pumps.remove_all_pumps(CloseReason::Shutdown).await;

        // Every pump teardown has been launched; the pool can refuse new
        // work now. This task is itself on the pool, so it must not wait
        // for the pool as a whole.
        self.pool.close();

        // Cancellation of this task during the awaits below abandons the
        // remaining handles; their leases expire and are picked up by
        // surviving hosts.
        for removal in removals {
            let partition_id = removal.partition_id().to_string();
            if let Err(e) = removal.wait().await {
                error!(
                    "Host {} failure during shutdown of partition {}: {}",
                    self.config.host_name, partition_id, e
                );
                self.report(Action::PartitionManagerCleanup, Some(&partition_id), &e);
            }
        }

        metrics::OWNED_LEASES.set(0);
        metrics::RUNNING_PUMPS.set(0);
        info!("Host {} partition manager exiting", self.config.host_name);
    }

    async fn run_loop(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<()> {
        while !self.stop.load(Ordering::Acquire) {
            let snapshot = self.check_and_renew_leases().await;
            let snapshot = self.steal_if_needed(snapshot).await;
            self.reconcile_pumps(&snapshot).await?;

            metrics::LOOP_ITERATIONS.inc();
            metrics::OWNED_LEASES.set(snapshot.ours.len() as i64);
            metrics::RUNNING_PUMPS.set(self.pumps.running_partitions().await.len() as i64);

            tokio::select! {
                _ = sleep(self.lease_store.lease_renew_interval()) => {}
                _ = shutdown_rx.recv() => {
                    info!(
                        "Host {} sleep interrupted, shutting down",
                        self.config.host_name
                    );
                    self.stop.store(true, Ordering::Release);
                }
            }
        }

        Ok(())
    }

    /// Inspect every lease: acquire the expired ones, renew our own, and
    /// classify the rest. A lease whose acquire or renew errors is left
    /// out of the snapshot entirely; this pass has no opinion on it.
    async fn check_and_renew_leases(&self) -> LeaseSnapshot {
        let host_name = self.config.host_name.as_str();
        let mut snapshot = LeaseSnapshot::default();

        for fetched in self.lease_store.get_all_leases().await {
            let lease = match fetched {
                Ok(lease) => lease,
                Err(e) => {
                    warn!("Host {} failure fetching lease, skipping: {}", host_name, e);
                    self.report(Action::CheckingLeases, None, &e);
                    continue;
                }
            };

            if lease.is_expired(Utc::now()) {
                let mut candidate = lease.clone();
                candidate.owner = host_name.to_string();
                match self.lease_store.acquire_lease(&candidate).await {
                    Ok(true) => {
                        debug!("Host {} acquired expired lease for partition {}", host_name, lease.partition_id);
                        metrics::LEASES_ACQUIRED.inc();
                        snapshot.record_ours(candidate);
                    }
                    Ok(false) => {
                        // Another host got there between the read and the
                        // acquire; treat it as theirs until the next pass.
                        snapshot.record_theirs(lease);
                    }
                    Err(e) => self.skip_lease(&lease, e),
                }
            } else if lease.is_owned_by(host_name) {
                match self.lease_store.renew_lease(&lease).await {
                    Ok(true) => snapshot.record_ours(lease),
                    Ok(false) => {
                        warn!(
                            "Host {} lost lease for partition {} at renewal",
                            host_name, lease.partition_id
                        );
                        metrics::RENEW_FAILURES.inc();
                        snapshot.record_theirs(lease);
                    }
                    Err(e) => {
                        metrics::RENEW_FAILURES.inc();
                        self.skip_lease(&lease, e);
                    }
                }
            } else {
                snapshot.record_theirs(lease);
            }
        }

        snapshot
    }

    fn skip_lease(&self, lease: &Lease, error: BallastError) {
        warn!(
            "Host {} failure checking lease for partition {}, skipping: {}",
            self.config.host_name, lease.partition_id, error
        );
        self.report(Action::CheckingLeases, Some(&lease.partition_id), &error);
    }

    /// Attempt at most one steal per iteration, even when the steal fails.
    async fn steal_if_needed(&self, mut snapshot: LeaseSnapshot) -> LeaseSnapshot {
        if snapshot.others.is_empty() {
            return snapshot;
        }

        let Some(stealee) = balancer::steal_candidate(&snapshot.others, snapshot.ours.len())
        else {
            return snapshot;
        };

        let host_name = self.config.host_name.as_str();
        let partition_id = stealee.partition_id.clone();
        let mut candidate = stealee;
        candidate.owner = host_name.to_string();

        match self.lease_store.acquire_lease(&candidate).await {
            Ok(true) => {
                info!("Host {} stole lease for partition {}", host_name, partition_id);
                metrics::LEASES_STOLEN.inc();
                snapshot.promote(candidate);
            }
            Ok(false) => {
                warn!(
                    "Host {} failed to steal lease for partition {}",
                    host_name, partition_id
                );
            }
            Err(e) => {
                error!(
                    "Host {} failure stealing lease for partition {}: {}",
                    host_name, partition_id, e
                );
                self.report(Action::StealingLease, Some(&partition_id), &e);
            }
        }

        snapshot
    }

    /// Bring the pump set in line with the snapshot: a pump for every
    /// lease we hold, none for the rest.
    async fn reconcile_pumps(&self, snapshot: &LeaseSnapshot) -> Result<()> {
        for lease in snapshot.ours.values() {
            self.pumps.add_pump(&lease.partition_id, lease.clone()).await;
        }

        for lease in &snapshot.others {
            if let Some(removal) = self
                .pumps
                .remove_pump(&lease.partition_id, CloseReason::LeaseLost)
                .await
            {
                // Wait out the teardown so the next iteration cannot
                // reacquire this partition while the old pump still holds
                // its subscriber.
                removal.wait().await?;
            }
        }

        Ok(())
    }

    fn report(&self, action: Action, partition_id: Option<&str>, error: &BallastError) {
        self.notifier.notify(ErrorNotification {
            host_name: self.config.host_name.clone(),
            action,
            partition_id: partition_id.map(String::from),
            message: error.to_string(),
        });
    }
}
