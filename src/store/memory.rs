//! In-memory lease and checkpoint stores
//!
//! Complete in-process implementations of the store contracts, used for
//! local runs and tests. Fault-injection hooks let tests script transient
//! store errors without a real backing service.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Checkpoint, CheckpointStore, Lease, LeaseStore};
use crate::error::{BallastError, Result};
use crate::{DEFAULT_LEASE_DURATION_SECS, DEFAULT_RENEW_INTERVAL_SECS};

fn store_missing(which: &str) -> BallastError {
    BallastError::StoreUnavailable {
        message: format!("{} store does not exist", which),
    }
}

fn injected(op: &str, partition_id: &str) -> BallastError {
    BallastError::StoreUnavailable {
        message: format!("injected {} fault for partition {}", op, partition_id),
    }
}

/// In-memory lease store with compare-and-set acquisition
pub struct InMemoryLeaseStore {
    /// None until the store itself has been created
    leases: RwLock<Option<HashMap<String, Lease>>>,
    lease_duration: Duration,
    renew_interval: Duration,
    // One-shot fault sets, consumed by the next matching call
    get_faults: Mutex<HashSet<String>>,
    acquire_faults: Mutex<HashSet<String>>,
    renew_faults: Mutex<HashSet<String>>,
    // Remaining forced failures for store/record creation
    create_store_faults: Mutex<u32>,
    create_lease_faults: Mutex<u32>,
}

impl InMemoryLeaseStore {
    /// Create a store with explicit timing parameters
    pub fn new(lease_duration: Duration, renew_interval: Duration) -> Self {
        Self {
            leases: RwLock::new(None),
            lease_duration,
            renew_interval,
            get_faults: Mutex::new(HashSet::new()),
            acquire_faults: Mutex::new(HashSet::new()),
            renew_faults: Mutex::new(HashSet::new()),
            create_store_faults: Mutex::new(0),
            create_lease_faults: Mutex::new(0),
        }
    }

    fn expiry_from_now(&self) -> chrono::DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.lease_duration).unwrap_or(ChronoDuration::zero())
    }

    /// Make the next enumeration of `partition_id` fail once
    pub fn fail_next_get(&self, partition_id: &str) {
        self.get_faults.lock().insert(partition_id.to_string());
    }

    /// Make the next acquire of `partition_id` fail once
    pub fn fail_next_acquire(&self, partition_id: &str) {
        self.acquire_faults.lock().insert(partition_id.to_string());
    }

    /// Make the next renew of `partition_id` fail once
    pub fn fail_next_renew(&self, partition_id: &str) {
        self.renew_faults.lock().insert(partition_id.to_string());
    }

    /// Make the next `count` store-creation calls fail
    pub fn fail_store_creation(&self, count: u32) {
        *self.create_store_faults.lock() = count;
    }

    /// Make the next `count` lease-creation calls fail
    pub fn fail_lease_creation(&self, count: u32) {
        *self.create_lease_faults.lock() = count;
    }

    /// Force the record's expiry into the past, as if renewal lapsed
    pub async fn expire(&self, partition_id: &str) {
        if let Some(map) = self.leases.write().await.as_mut() {
            if let Some(lease) = map.get_mut(partition_id) {
                lease.expires_at = Utc::now() - ChronoDuration::seconds(1);
            }
        }
    }

    /// Overwrite ownership out from under the current holder, the way a
    /// competing host's acquire would
    pub async fn force_owner(&self, partition_id: &str, owner: &str) {
        let expires_at = self.expiry_from_now();
        if let Some(map) = self.leases.write().await.as_mut() {
            if let Some(lease) = map.get_mut(partition_id) {
                lease.owner = owner.to_string();
                lease.expires_at = expires_at;
                lease.epoch += 1;
            }
        }
    }

    /// Current record for a partition
    pub async fn lease(&self, partition_id: &str) -> Option<Lease> {
        self.leases
            .read()
            .await
            .as_ref()
            .and_then(|map| map.get(partition_id).cloned())
    }

    /// How many live leases `owner` holds right now
    pub async fn owned_count(&self, owner: &str) -> usize {
        let now = Utc::now();
        self.leases
            .read()
            .await
            .as_ref()
            .map(|map| {
                map.values()
                    .filter(|l| l.is_owned_by(owner) && !l.is_expired(now))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for InMemoryLeaseStore {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_LEASE_DURATION_SECS),
            Duration::from_secs(DEFAULT_RENEW_INTERVAL_SECS),
        )
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn lease_store_exists(&self) -> Result<bool> {
        Ok(self.leases.read().await.is_some())
    }

    async fn create_lease_store_if_absent(&self) -> Result<()> {
        {
            let mut faults = self.create_store_faults.lock();
            if *faults > 0 {
                *faults -= 1;
                return Err(injected("create-store", "*"));
            }
        }

        let mut guard = self.leases.write().await;
        if guard.is_none() {
            *guard = Some(HashMap::new());
            debug!("Created in-memory lease store");
        }
        Ok(())
    }

    async fn create_lease_if_absent(&self, partition_id: &str) -> Result<()> {
        {
            let mut faults = self.create_lease_faults.lock();
            if *faults > 0 {
                *faults -= 1;
                return Err(injected("create-lease", partition_id));
            }
        }

        let mut guard = self.leases.write().await;
        let map = guard.as_mut().ok_or_else(|| store_missing("lease"))?;
        map.entry(partition_id.to_string())
            .or_insert_with(|| Lease::unowned(partition_id));
        Ok(())
    }

    async fn get_all_leases(&self) -> Vec<Result<Lease>> {
        let guard = self.leases.read().await;
        let Some(map) = guard.as_ref() else {
            return Vec::new();
        };

        let mut faults = self.get_faults.lock();
        let mut ids: Vec<&String> = map.keys().collect();
        ids.sort();

        ids.into_iter()
            .map(|id| {
                if faults.remove(id) {
                    Err(injected("get", id))
                } else {
                    Ok(map[id].clone())
                }
            })
            .collect()
    }

    async fn acquire_lease(&self, lease: &Lease) -> Result<bool> {
        if self.acquire_faults.lock().remove(&lease.partition_id) {
            return Err(injected("acquire", &lease.partition_id));
        }

        let mut guard = self.leases.write().await;
        let map = guard.as_mut().ok_or_else(|| store_missing("lease"))?;
        let stored = map
            .get_mut(&lease.partition_id)
            .ok_or_else(|| BallastError::LeaseNotFound {
                partition_id: lease.partition_id.clone(),
            })?;

        // Compare-and-set on the epoch: lose the race if another host has
        // moved the record since this copy was read.
        if stored.epoch != lease.epoch {
            debug!(
                "Acquire lost race on partition {}: epoch {} moved to {}",
                lease.partition_id, lease.epoch, stored.epoch
            );
            return Ok(false);
        }

        stored.owner = lease.owner.clone();
        stored.expires_at = self.expiry_from_now();
        stored.epoch += 1;
        debug!(
            "Partition {} acquired by {} (epoch {})",
            stored.partition_id, stored.owner, stored.epoch
        );
        Ok(true)
    }

    async fn renew_lease(&self, lease: &Lease) -> Result<bool> {
        if self.renew_faults.lock().remove(&lease.partition_id) {
            return Err(injected("renew", &lease.partition_id));
        }

        let mut guard = self.leases.write().await;
        let map = guard.as_mut().ok_or_else(|| store_missing("lease"))?;
        let stored = map
            .get_mut(&lease.partition_id)
            .ok_or_else(|| BallastError::LeaseNotFound {
                partition_id: lease.partition_id.clone(),
            })?;

        if !stored.is_owned_by(&lease.owner) {
            return Ok(false);
        }

        stored.expires_at = self.expiry_from_now();
        Ok(true)
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let mut guard = self.leases.write().await;
        let map = guard.as_mut().ok_or_else(|| store_missing("lease"))?;
        if let Some(stored) = map.get_mut(&lease.partition_id) {
            if stored.is_owned_by(&lease.owner) {
                let unowned = Lease::unowned(&lease.partition_id);
                stored.owner = unowned.owner;
                stored.expires_at = unowned.expires_at;
            }
        }
        Ok(())
    }

    fn lease_renew_interval(&self) -> Duration {
        self.renew_interval
    }

    fn lease_duration(&self) -> Duration {
        self.lease_duration
    }
}

/// In-memory checkpoint store
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<Option<HashMap<String, Checkpoint>>>,
    create_store_faults: Mutex<u32>,
    create_checkpoint_faults: Mutex<u32>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(None),
            create_store_faults: Mutex::new(0),
            create_checkpoint_faults: Mutex::new(0),
        }
    }

    /// Make the next `count` store-creation calls fail
    pub fn fail_store_creation(&self, count: u32) {
        *self.create_store_faults.lock() = count;
    }

    /// Make the next `count` checkpoint-creation calls fail
    pub fn fail_checkpoint_creation(&self, count: u32) {
        *self.create_checkpoint_faults.lock() = count;
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn checkpoint_store_exists(&self) -> Result<bool> {
        Ok(self.checkpoints.read().await.is_some())
    }

    async fn create_checkpoint_store_if_absent(&self) -> Result<()> {
        {
            let mut faults = self.create_store_faults.lock();
            if *faults > 0 {
                *faults -= 1;
                return Err(injected("create-store", "*"));
            }
        }

        let mut guard = self.checkpoints.write().await;
        if guard.is_none() {
            *guard = Some(HashMap::new());
            debug!("Created in-memory checkpoint store");
        }
        Ok(())
    }

    async fn create_checkpoint_if_absent(&self, partition_id: &str) -> Result<()> {
        {
            let mut faults = self.create_checkpoint_faults.lock();
            if *faults > 0 {
                *faults -= 1;
                return Err(injected("create-checkpoint", partition_id));
            }
        }

        let mut guard = self.checkpoints.write().await;
        let map = guard.as_mut().ok_or_else(|| store_missing("checkpoint"))?;
        map.entry(partition_id.to_string())
            .or_insert_with(|| Checkpoint::start_of_stream(partition_id));
        Ok(())
    }

    async fn get_checkpoint(&self, partition_id: &str) -> Result<Option<Checkpoint>> {
        let guard = self.checkpoints.read().await;
        let map = guard.as_ref().ok_or_else(|| store_missing("checkpoint"))?;
        Ok(map.get(partition_id).cloned())
    }

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut guard = self.checkpoints.write().await;
        let map = guard.as_mut().ok_or_else(|| store_missing("checkpoint"))?;
        if !map.contains_key(&checkpoint.partition_id) {
            return Err(BallastError::CheckpointNotFound {
                partition_id: checkpoint.partition_id.clone(),
            });
        }
        map.insert(checkpoint.partition_id.clone(), checkpoint.clone());
        Ok(())
    }
}
