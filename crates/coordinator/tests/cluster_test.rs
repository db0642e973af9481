use std::sync::Arc;
use std::time::Duration;

use client::ClientRouter;
use coordination::MemoryCoordination;
use corelib::{CacheStrategy, NodeStatus};
use coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, LocalLauncher, Machine, MachinePool};
use protocol::StatusType;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct Cluster {
    coordinator: Coordinator,
    launcher: Arc<LocalLauncher>,
    pool: MachinePool,
}

impl Cluster {
    fn new(machines: usize) -> Self {
        let pool = MachinePool::new(
            (1..=machines)
                .map(|i| Machine::new(format!("server{i}"), "127.0.0.1", free_port()))
                .collect(),
        );
        let ensemble = MemoryCoordination::new();
        let config = CoordinatorConfig {
            await_timeout: Duration::from_secs(5),
            launch_grace: Duration::from_millis(10),
            ..CoordinatorConfig::default()
        };
        let launcher = Arc::new(LocalLauncher::new(ensemble.clone(), config.paths.clone()));
        let (coordinator, _) = Coordinator::spawn(
            config,
            pool.clone(),
            launcher.clone(),
            Arc::new(ensemble.connect()),
        );
        Self {
            coordinator,
            launcher,
            pool,
        }
    }

    fn machine(&self, name: &str) -> &Machine {
        self.pool.get(name).unwrap()
    }

    async fn count(&self, status: NodeStatus) -> usize {
        let info = self.coordinator.status().await.unwrap();
        info.values().filter(|s| **s == status).count()
    }

    async fn status_of(&self, name: &str) -> NodeStatus {
        let info = self.coordinator.status().await.unwrap();
        info[&self.machine(name).label()]
    }

    /// Poll until `failed` is marked FAILED and `replacement` reached `status`.
    async fn await_replacement(&self, failed: &str, replacement: &str, status: NodeStatus) {
        for _ in 0..250 {
            if self.status_of(failed).await == NodeStatus::Failed
                && self.status_of(replacement).await == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "{replacement} did not replace {failed}: {:?}",
            self.coordinator.status().await.unwrap()
        );
    }

    /// A client attached to some server that is currently in the ring.
    async fn client(&self) -> ClientRouter {
        let table = self.coordinator.metadata().await.unwrap();
        let address = table.addresses().next().unwrap().to_string();
        ClientRouter::connect(&address).await.unwrap()
    }
}

fn keys() -> Vec<String> {
    (0..30).map(|i| format!("key{i}")).collect()
}

async fn put_all(client: &mut ClientRouter) {
    for key in keys() {
        let reply = client.put(&key, &format!("value-{key}")).await.unwrap();
        assert_eq!(reply.status, StatusType::PutSuccess, "{key}");
    }
}

async fn assert_all_readable(client: &mut ClientRouter) {
    for key in keys() {
        let reply = client.get(&key).await.unwrap();
        assert_eq!(reply.status, StatusType::GetSuccess, "{key}");
        assert_eq!(reply.value, format!("value-{key}"));
    }
}

// ---------------------------------------------------------------------------
// Adding and starting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_added_servers_serve_after_start() {
    let cluster = Cluster::new(4);
    let added = cluster
        .coordinator
        .add_nodes(3, CacheStrategy::Lru, 10)
        .await
        .unwrap();
    assert_eq!(added.len(), 3);
    assert_eq!(added[0], cluster.machine("server1").label());
    assert_eq!(cluster.count(NodeStatus::Idle).await, 3);
    assert_eq!(cluster.count(NodeStatus::Offline).await, 1);

    assert_eq!(cluster.coordinator.start().await.unwrap(), 3);
    assert_eq!(cluster.count(NodeStatus::Online).await, 3);
    assert_eq!(cluster.coordinator.metadata().await.unwrap().len(), 3);

    let mut client = cluster.client().await;
    put_all(&mut client).await;
    assert_all_readable(&mut client).await;
}

#[tokio::test]
async fn test_too_many_servers_requested() {
    let cluster = Cluster::new(2);
    let err = cluster
        .coordinator
        .add_nodes(3, CacheStrategy::Fifo, 10)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::NotEnoughMachines {
            requested: 3,
            available: 2
        }
    ));
    assert_eq!(cluster.count(NodeStatus::Offline).await, 2);
    assert!(cluster.coordinator.metadata().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_growing_cluster_keeps_data() {
    let cluster = Cluster::new(3);
    cluster.coordinator.add_nodes(1, CacheStrategy::Fifo, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();
    let mut client = cluster.client().await;
    put_all(&mut client).await;

    cluster.coordinator.add_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();
    assert_all_readable(&mut client).await;
}

#[tokio::test]
async fn test_stopped_servers_reject_clients() {
    let cluster = Cluster::new(1);
    cluster.coordinator.add_nodes(1, CacheStrategy::Fifo, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();
    let mut client = cluster.client().await;

    cluster.coordinator.stop().await.unwrap();
    assert_eq!(cluster.status_of("server1").await, NodeStatus::Idle);
    let reply = client.get("k").await.unwrap();
    assert_eq!(reply.status, StatusType::ServerStopped);
}

// ---------------------------------------------------------------------------
// Removal and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_planned_removal_hands_off_data() {
    let cluster = Cluster::new(3);
    cluster.coordinator.add_nodes(3, CacheStrategy::Lfu, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();
    let mut client = cluster.client().await;
    put_all(&mut client).await;
    client.disconnect().await.unwrap();

    let removed = cluster
        .coordinator
        .remove_nodes(vec![cluster.machine("server2").label()])
        .await
        .unwrap();
    assert_eq!(removed, vec![cluster.machine("server2").label()]);
    assert_eq!(cluster.status_of("server2").await, NodeStatus::Offline);
    assert!(!cluster.launcher.is_running("server2"));

    let table = cluster.coordinator.metadata().await.unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.get(&cluster.machine("server2").address()).is_none());

    let mut client = cluster.client().await;
    assert_all_readable(&mut client).await;
}

#[tokio::test]
async fn test_remove_unknown_server() {
    let cluster = Cluster::new(2);
    cluster.coordinator.add_nodes(1, CacheStrategy::Fifo, 10).await.unwrap();
    let err = cluster
        .coordinator
        .remove_nodes(vec!["server2".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::UnknownServer(_)));
    assert_eq!(cluster.coordinator.metadata().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_shutdown_clears_ring() {
    let cluster = Cluster::new(2);
    cluster.coordinator.add_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();

    cluster.coordinator.shutdown().await.unwrap();
    assert_eq!(cluster.count(NodeStatus::Offline).await, 2);
    assert!(cluster.coordinator.metadata().await.unwrap().is_empty());
    assert!(!cluster.launcher.is_running("server1"));
    assert!(!cluster.launcher.is_running("server2"));

    // Machines are reusable after a clean shutdown.
    let added = cluster.coordinator.add_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();
    assert_eq!(added.len(), 2);
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_crashed_server_is_replaced() {
    let cluster = Cluster::new(4);
    cluster.coordinator.add_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();

    cluster.launcher.kill("server1").unwrap();
    cluster.await_replacement("server1", "server3", NodeStatus::Online).await;
    assert_eq!(cluster.count(NodeStatus::Online).await, 2);

    let table = cluster.coordinator.metadata().await.unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.get(&cluster.machine("server1").address()).is_none());

    let mut client = cluster.client().await;
    let reply = client.put("after-crash", "v").await.unwrap();
    assert_eq!(reply.status, StatusType::PutSuccess);
}

#[tokio::test]
async fn test_attached_client_survives_crash() {
    let cluster = Cluster::new(3);
    cluster.coordinator.add_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();

    let table = cluster.coordinator.metadata().await.unwrap();
    let doomed = cluster.machine("server1").address();
    let key = (0..1000)
        .map(|i| format!("key{i}"))
        .find(|k| table.owner_of_key(k).unwrap().address() == doomed)
        .unwrap();
    let mut client = ClientRouter::connect(&doomed).await.unwrap();
    client.set_metadata(table);
    let reply = client.put(&key, "before").await.unwrap();
    assert_eq!(reply.status, StatusType::PutSuccess);

    cluster.launcher.kill("server1").unwrap();
    cluster.await_replacement("server1", "server3", NodeStatus::Online).await;

    // The crashed server's data is gone with it; the key is new to its successor.
    let reply = client.put(&key, "after").await.unwrap();
    assert_eq!(reply.status, StatusType::PutSuccess);
    assert_ne!(client.connected_to(), Some(doomed.as_str()));
    let reply = client.get(&key).await.unwrap();
    assert_eq!(reply.status, StatusType::GetSuccess);
    assert_eq!(reply.value, "after");
}

#[tokio::test]
async fn test_replacement_is_watched_too() {
    let cluster = Cluster::new(4);
    cluster.coordinator.add_nodes(2, CacheStrategy::Lru, 10).await.unwrap();
    cluster.coordinator.start().await.unwrap();

    cluster.launcher.kill("server1").unwrap();
    cluster.await_replacement("server1", "server3", NodeStatus::Online).await;

    cluster.launcher.kill("server3").unwrap();
    cluster.await_replacement("server3", "server4", NodeStatus::Online).await;
    assert_eq!(cluster.count(NodeStatus::Online).await, 2);
    assert_eq!(cluster.count(NodeStatus::Failed).await, 2);

    let mut client = cluster.client().await;
    let reply = client.put("after-second-crash", "v").await.unwrap();
    assert_eq!(reply.status, StatusType::PutSuccess);
}

#[tokio::test]
async fn test_idle_crash_is_replaced_without_start() {
    let cluster = Cluster::new(3);
    cluster.coordinator.add_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();

    cluster.launcher.kill("server2").unwrap();
    cluster.await_replacement("server2", "server3", NodeStatus::Idle).await;
    assert_eq!(cluster.count(NodeStatus::Idle).await, 2);
    assert_eq!(cluster.count(NodeStatus::Online).await, 0);

    let mut client = cluster.client().await;
    let reply = client.get("k").await.unwrap();
    assert_eq!(reply.status, StatusType::ServerStopped);
}
