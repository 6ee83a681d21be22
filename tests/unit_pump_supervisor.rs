//! Unit tests for the task-based pump supervisor
//!
//! Exercises the idempotent add/remove contract the partition manager
//! reconciles against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ballast_core::error::Result;
use ballast_core::pump::{
    CloseReason, PartitionPump, PumpFactory, PumpSupervisor, TaskPumpSupervisor,
};
use ballast_core::runtime::WorkerPool;
use ballast_core::store::Lease;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PumpEvent {
    Opened(String, u64),
    LeaseUpdated(String, u64),
    Closed(String, CloseReason),
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<PumpEvent>>,
}

impl EventLog {
    fn push(&self, event: PumpEvent) {
        self.events.lock().push(event);
    }

    fn snapshot(&self) -> Vec<PumpEvent> {
        self.events.lock().clone()
    }
}

struct RecordingPump {
    partition_id: String,
    log: Arc<EventLog>,
    fail_open: bool,
}

#[async_trait]
impl PartitionPump for RecordingPump {
    async fn open(&mut self, lease: &Lease) -> Result<()> {
        if self.fail_open {
            return Err(ballast_core::BallastError::PumpFailure {
                partition_id: self.partition_id.clone(),
                message: "scripted open failure".into(),
            });
        }
        self.log
            .push(PumpEvent::Opened(self.partition_id.clone(), lease.epoch));
        Ok(())
    }

    async fn lease_updated(&mut self, lease: &Lease) {
        self.log
            .push(PumpEvent::LeaseUpdated(self.partition_id.clone(), lease.epoch));
    }

    async fn close(&mut self, reason: CloseReason) {
        self.log
            .push(PumpEvent::Closed(self.partition_id.clone(), reason));
    }
}

struct RecordingFactory {
    log: Arc<EventLog>,
    fail_open: bool,
}

impl PumpFactory for RecordingFactory {
    fn create(&self, partition_id: &str) -> Box<dyn PartitionPump> {
        Box::new(RecordingPump {
            partition_id: partition_id.to_string(),
            log: self.log.clone(),
            fail_open: self.fail_open,
        })
    }
}

fn supervisor_with_log() -> (Arc<TaskPumpSupervisor>, Arc<EventLog>, WorkerPool) {
    let log = Arc::new(EventLog::default());
    let factory = Arc::new(RecordingFactory {
        log: log.clone(),
        fail_open: false,
    });
    let pool = WorkerPool::current();
    let supervisor = Arc::new(TaskPumpSupervisor::new(factory, pool.clone()));
    (supervisor, log, pool)
}

fn owned_lease(partition_id: &str, epoch: u64) -> Lease {
    let mut lease = Lease::unowned(partition_id);
    lease.owner = "host-a".to_string();
    lease.epoch = epoch;
    lease
}

async fn settle() {
    // Let pump driver tasks run their queued commands.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_add_starts_pump_and_opens_with_lease() {
    let (supervisor, log, _pool) = supervisor_with_log();

    supervisor.add_pump("0", owned_lease("0", 3)).await;
    settle().await;

    assert_eq!(supervisor.running_partitions().await, vec!["0".to_string()]);
    assert_eq!(log.snapshot(), vec![PumpEvent::Opened("0".into(), 3)]);
}

#[tokio::test]
async fn test_second_add_refreshes_lease_in_place() {
    let (supervisor, log, _pool) = supervisor_with_log();

    supervisor.add_pump("0", owned_lease("0", 1)).await;
    supervisor.add_pump("0", owned_lease("0", 2)).await;
    settle().await;

    assert_eq!(supervisor.pump_count().await, 1);
    assert_eq!(
        log.snapshot(),
        vec![
            PumpEvent::Opened("0".into(), 1),
            PumpEvent::LeaseUpdated("0".into(), 2),
        ]
    );
}

#[tokio::test]
async fn test_remove_closes_with_reason() {
    let (supervisor, log, _pool) = supervisor_with_log();

    supervisor.add_pump("0", owned_lease("0", 1)).await;
    let removal = supervisor
        .remove_pump("0", CloseReason::LeaseLost)
        .await
        .expect("pump was running");
    removal.wait().await.unwrap();

    let events = log.snapshot();
    assert_eq!(
        events.last(),
        Some(&PumpEvent::Closed("0".into(), CloseReason::LeaseLost))
    );
    assert!(supervisor.running_partitions().await.is_empty());
}

#[tokio::test]
async fn test_remove_missing_pump_is_noop() {
    let (supervisor, log, _pool) = supervisor_with_log();

    assert!(supervisor.remove_pump("9", CloseReason::LeaseLost).await.is_none());
    assert!(log.snapshot().is_empty());
}

#[tokio::test]
async fn test_remove_all_closes_every_pump() {
    let (supervisor, log, _pool) = supervisor_with_log();

    for id in ["0", "1", "2"] {
        supervisor.add_pump(id, owned_lease(id, 1)).await;
    }

    let removals = supervisor.remove_all_pumps(CloseReason::Shutdown).await;
    assert_eq!(removals.len(), 3);
    for removal in removals {
        removal.wait().await.unwrap();
    }

    let closed: Vec<_> = log
        .snapshot()
        .into_iter()
        .filter(|e| matches!(e, PumpEvent::Closed(_, CloseReason::Shutdown)))
        .collect();
    assert_eq!(closed.len(), 3);
    assert_eq!(supervisor.pump_count().await, 0);
}

#[tokio::test]
async fn test_failed_open_pump_is_replaced_on_next_add() {
    let log = Arc::new(EventLog::default());
    let failing = Arc::new(RecordingFactory {
        log: log.clone(),
        fail_open: true,
    });
    let pool = WorkerPool::current();
    let supervisor = TaskPumpSupervisor::new(failing, pool.clone());

    supervisor.add_pump("0", owned_lease("0", 1)).await;
    settle().await;
    // Driver exited without opening; a later add must start fresh rather
    // than refresh a dead pump.
    supervisor.add_pump("0", owned_lease("0", 2)).await;
    settle().await;

    assert_eq!(supervisor.pump_count().await, 1);
    assert!(log.snapshot().is_empty());
}

#[tokio::test]
async fn test_closed_pool_refuses_new_pumps() {
    let (supervisor, log, pool) = supervisor_with_log();

    pool.close();
    supervisor.add_pump("0", owned_lease("0", 1)).await;
    settle().await;

    assert_eq!(supervisor.pump_count().await, 0);
    assert!(log.snapshot().is_empty());
}
