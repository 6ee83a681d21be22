//! Task-based pump supervisor
//!
//! Runs each pump as a task on the shared worker pool and talks to it over
//! a per-pump command channel, so the manager's add/remove calls are
//! commands to an independently scheduled worker rather than direct
//! manipulation of pump state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use super::{CloseReason, PartitionPump, PumpFactory, PumpRemoval, PumpSupervisor};
use crate::runtime::WorkerPool;
use crate::store::Lease;

enum PumpCommand {
    SetLease(Lease),
    Close(CloseReason),
}

struct RunningPump {
    commands: mpsc::UnboundedSender<PumpCommand>,
    handle: tokio::task::JoinHandle<()>,
}

/// Supervisor running pumps as worker-pool tasks
pub struct TaskPumpSupervisor {
    factory: Arc<dyn PumpFactory>,
    pool: WorkerPool,
    pumps: RwLock<HashMap<String, RunningPump>>,
}

impl TaskPumpSupervisor {
    pub fn new(factory: Arc<dyn PumpFactory>, pool: WorkerPool) -> Self {
        Self {
            factory,
            pool,
            pumps: RwLock::new(HashMap::new()),
        }
    }

    /// Number of pumps currently running
    pub async fn pump_count(&self) -> usize {
        self.pumps.read().await.len()
    }
}

#[async_trait]
impl PumpSupervisor for TaskPumpSupervisor {
    async fn add_pump(&self, partition_id: &str, lease: Lease) {
        let mut pumps = self.pumps.write().await;

        if let Some(running) = pumps.get(partition_id) {
            if running
                .commands
                .send(PumpCommand::SetLease(lease.clone()))
                .is_ok()
            {
                debug!("Refreshed lease on running pump for partition {}", partition_id);
                return;
            }
            // The driver exited on its own (open failure); replace it.
            pumps.remove(partition_id);
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let pump = self.factory.create(partition_id);
        let driver = drive_pump(pump, partition_id.to_string(), lease, command_rx);

        match self.pool.spawn(driver) {
            Ok(handle) => {
                info!("Started pump for partition {}", partition_id);
                pumps.insert(partition_id.to_string(), RunningPump { commands, handle });
            }
            Err(_) => {
                warn!(
                    "Worker pool closed, not starting pump for partition {}",
                    partition_id
                );
            }
        }
    }

    async fn remove_pump(&self, partition_id: &str, reason: CloseReason) -> Option<PumpRemoval> {
        let running = self.pumps.write().await.remove(partition_id)?;
        info!("Stopping pump for partition {} ({:?})", partition_id, reason);

        // A send failure means the driver already exited; the handle
        // resolves immediately in that case.
        let _ = running.commands.send(PumpCommand::Close(reason));
        Some(PumpRemoval::new(partition_id.to_string(), running.handle))
    }

    async fn remove_all_pumps(&self, reason: CloseReason) -> Vec<PumpRemoval> {
        let drained: Vec<(String, RunningPump)> =
            self.pumps.write().await.drain().collect();

        let mut removals = Vec::with_capacity(drained.len());
        for (partition_id, running) in drained {
            info!("Stopping pump for partition {} ({:?})", partition_id, reason);
            let _ = running.commands.send(PumpCommand::Close(reason));
            removals.push(PumpRemoval::new(partition_id, running.handle));
        }
        removals
    }

    async fn running_partitions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pumps.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

async fn drive_pump(
    mut pump: Box<dyn PartitionPump>,
    partition_id: String,
    lease: Lease,
    mut commands: mpsc::UnboundedReceiver<PumpCommand>,
) {
    if let Err(e) = pump.open(&lease).await {
        error!("Pump for partition {} failed to open: {}", partition_id, e);
        return;
    }

    let reason = loop {
        match commands.recv().await {
            Some(PumpCommand::SetLease(lease)) => pump.lease_updated(&lease).await,
            Some(PumpCommand::Close(reason)) => break reason,
            // Supervisor dropped without an explicit close
            None => break CloseReason::Shutdown,
        }
    };

    pump.close(reason).await;
    debug!("Pump for partition {} closed ({:?})", partition_id, reason);
}
