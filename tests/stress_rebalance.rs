//! Rebalancing tests with live manager instances
//!
//! Run with: cargo test --test stress_rebalance -- --nocapture
//!
//! Two real partition managers share one in-memory lease store and steal
//! their way to an even split, one lease per iteration.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::sleep;

use ballast_core::error::Result;
use ballast_core::manager::{ManagerConfig, PartitionManager};
use ballast_core::notify::TracingNotifier;
use ballast_core::pump::{
    CloseReason, PartitionPump, PumpFactory, PumpSupervisor, TaskPumpSupervisor,
};
use ballast_core::runtime::WorkerPool;
use ballast_core::store::{
    CheckpointStore, InMemoryCheckpointStore, InMemoryLeaseStore, Lease, LeaseStore,
};

fn init_tracing() {
    // First caller wins; later tests reuse the same subscriber.
    let _ = tracing_subscriber::fmt::try_init();
}

struct IdlePump;

#[async_trait]
impl PartitionPump for IdlePump {
    async fn open(&mut self, _lease: &Lease) -> Result<()> {
        Ok(())
    }
    async fn lease_updated(&mut self, _lease: &Lease) {}
    async fn close(&mut self, _reason: CloseReason) {}
}

struct IdleFactory;

impl PumpFactory for IdleFactory {
    fn create(&self, _partition_id: &str) -> Box<dyn PartitionPump> {
        Box::new(IdlePump)
    }
}

struct Host {
    manager: Arc<PartitionManager>,
    supervisor: Arc<TaskPumpSupervisor>,
}

fn build_host(
    name: &str,
    partitions: &[String],
    lease_store: &Arc<InMemoryLeaseStore>,
    checkpoint_store: &Arc<InMemoryCheckpointStore>,
) -> Host {
    let pool = WorkerPool::current();
    let supervisor = Arc::new(TaskPumpSupervisor::new(Arc::new(IdleFactory), pool.clone()));
    let manager = PartitionManager::new(
        ManagerConfig {
            host_name: name.to_string(),
        },
        partitions.to_vec(),
        lease_store.clone() as Arc<dyn LeaseStore>,
        checkpoint_store.clone() as Arc<dyn CheckpointStore>,
        supervisor.clone(),
        Arc::new(TracingNotifier),
        pool,
    );
    Host { manager, supervisor }
}

async fn wait_for_split(
    lease_store: &InMemoryLeaseStore,
    expected: &[(&str, usize)],
    deadline: Duration,
) {
    let start = Instant::now();
    loop {
        let mut matched = true;
        for (host, count) in expected {
            if lease_store.owned_count(host).await != *count {
                matched = false;
                break;
            }
        }
        if matched {
            return;
        }
        if start.elapsed() > deadline {
            let mut counts = Vec::new();
            for (host, _) in expected {
                counts.push((host.to_string(), lease_store.owned_count(host).await));
            }
            panic!("cluster never reached {:?}, stuck at {:?}", expected, counts);
        }
        sleep(Duration::from_millis(25)).await;
    }
}

async fn stop_host(host: &Host) {
    if let Some(handle) = host.manager.stop_partitions().await {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn stress_two_hosts_converge_to_even_split() {
    init_tracing();
    let partitions: Vec<String> = (0..4).map(|i| i.to_string()).collect();
    let lease_store = Arc::new(InMemoryLeaseStore::new(
        Duration::from_secs(10),
        Duration::from_millis(40),
    ));
    let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());

    // Host A starts alone and grabs everything.
    let host_a = build_host("host-a", &partitions, &lease_store, &checkpoint_store);
    host_a.manager.initialize().await.unwrap();
    wait_for_split(&lease_store, &[("host-a", 4)], Duration::from_secs(5)).await;

    // Host B joins and steals its way to parity: 4/0 -> 3/1 -> 2/2.
    let start = Instant::now();
    let host_b = build_host("host-b", &partitions, &lease_store, &checkpoint_store);
    host_b.manager.initialize().await.unwrap();
    wait_for_split(
        &lease_store,
        &[("host-a", 2), ("host-b", 2)],
        Duration::from_secs(10),
    )
    .await;

    println!("Two-host convergence:");
    println!("  Partitions: {}", partitions.len());
    println!("  Converged in: {:?}", start.elapsed());

    // Let the pump sets catch up with the lease split, then check that no
    // partition is pumped twice and every partition is pumped somewhere.
    sleep(Duration::from_millis(200)).await;
    let pumps_a = host_a.supervisor.running_partitions().await;
    let pumps_b = host_b.supervisor.running_partitions().await;
    println!("  Pumps: host-a={:?} host-b={:?}", pumps_a, pumps_b);

    assert_eq!(pumps_a.len(), 2);
    assert_eq!(pumps_b.len(), 2);
    let all: HashSet<&String> = pumps_a.iter().chain(pumps_b.iter()).collect();
    assert_eq!(all.len(), partitions.len());

    stop_host(&host_b).await;
    stop_host(&host_a).await;
}

#[tokio::test]
async fn stress_uneven_partition_count_settles_at_gap_of_one() {
    init_tracing();
    let partitions: Vec<String> = (0..5).map(|i| i.to_string()).collect();
    let lease_store = Arc::new(InMemoryLeaseStore::new(
        Duration::from_secs(10),
        Duration::from_millis(40),
    ));
    let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());

    let host_a = build_host("host-a", &partitions, &lease_store, &checkpoint_store);
    host_a.manager.initialize().await.unwrap();
    wait_for_split(&lease_store, &[("host-a", 5)], Duration::from_secs(5)).await;

    let host_b = build_host("host-b", &partitions, &lease_store, &checkpoint_store);
    host_b.manager.initialize().await.unwrap();
    wait_for_split(
        &lease_store,
        &[("host-a", 3), ("host-b", 2)],
        Duration::from_secs(10),
    )
    .await;

    // The 3/2 split has a gap of one; neither host may steal further.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(lease_store.owned_count("host-a").await, 3);
    assert_eq!(lease_store.owned_count("host-b").await, 2);

    stop_host(&host_b).await;
    stop_host(&host_a).await;
}

#[tokio::test]
async fn stress_departed_host_leases_expire_and_move() {
    init_tracing();
    let partitions: Vec<String> = (0..4).map(|i| i.to_string()).collect();
    // Short leases: a host that stops renewing loses everything quickly.
    let lease_store = Arc::new(InMemoryLeaseStore::new(
        Duration::from_millis(200),
        Duration::from_millis(40),
    ));
    let checkpoint_store = Arc::new(InMemoryCheckpointStore::new());

    let host_a = build_host("host-a", &partitions, &lease_store, &checkpoint_store);
    host_a.manager.initialize().await.unwrap();
    wait_for_split(&lease_store, &[("host-a", 4)], Duration::from_secs(5)).await;

    let host_b = build_host("host-b", &partitions, &lease_store, &checkpoint_store);
    host_b.manager.initialize().await.unwrap();
    wait_for_split(
        &lease_store,
        &[("host-a", 2), ("host-b", 2)],
        Duration::from_secs(10),
    )
    .await;

    // Host A leaves; its leases lapse and B picks up the whole stream.
    stop_host(&host_a).await;
    wait_for_split(&lease_store, &[("host-b", 4)], Duration::from_secs(10)).await;

    sleep(Duration::from_millis(200)).await;
    assert_eq!(host_b.supervisor.running_partitions().await.len(), 4);

    stop_host(&host_b).await;
}
