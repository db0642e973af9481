//! Cluster membership, lifecycle and failure recovery.
//!
//! [`Coordinator`] is a cheap, cloneable handle. All state lives in a single
//! `CoordinatorCore` task that processes one [`Command`] at a time, so a
//! membership change (including every directive it pushes) finishes before
//! the next one starts. Crash watchers never touch that state; they post
//! `NodeLost` into the same queue.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use coordination::{ensure_path, ClusterPaths, CoordinationService, EventKind};
use corelib::{CacheStrategy, HashRing, MetadataEntry, MetadataTable, Node, NodeStatus, PlacementPolicy, RingPosition};
use metrics::counter;
use protocol::{DirectiveKind, DirectiveMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::await_group::AwaitGroup;
use crate::dispatch::{await_registration, deliver};
use crate::error::{CoordinatorError, Result};
use crate::launcher::Launcher;
use crate::pool::{Machine, MachinePool};

/// `name:host:port` of every candidate machine and its current status.
pub type ServerStatusInfo = BTreeMap<String, NodeStatus>;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub paths: ClusterPaths,
    pub placement: PlacementPolicy,
    /// Bound on each wait for registrations or acknowledgements.
    pub await_timeout: Duration,
    /// Pause after launching before looking for registrations.
    pub launch_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            paths: ClusterPaths::default(),
            placement: PlacementPolicy::Hashed,
            await_timeout: Duration::from_secs(10),
            launch_grace: Duration::from_millis(100),
        }
    }
}

enum Command {
    AddNodes {
        count: usize,
        cache_strategy: CacheStrategy,
        cache_size: usize,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Start {
        reply: oneshot::Sender<Result<usize>>,
    },
    Stop {
        reply: oneshot::Sender<Result<usize>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveNodes {
        servers: Vec<String>,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Status {
        reply: oneshot::Sender<ServerStatusInfo>,
    },
    Metadata {
        reply: oneshot::Sender<MetadataTable>,
    },
    NodeLost {
        name: String,
        epoch: u64,
    },
}

#[derive(Clone, Debug)]
pub struct Coordinator {
    commands: mpsc::Sender<Command>,
}

impl Coordinator {
    /// Start the coordinator task. It runs until every handle is dropped.
    pub fn spawn(
        config: CoordinatorConfig,
        pool: MachinePool,
        launcher: Arc<dyn Launcher>,
        session: Arc<dyn CoordinationService>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let core = CoordinatorCore {
            ring: HashRing::with_policy(config.placement),
            config,
            pool,
            launcher,
            session,
            commands: tx.downgrade(),
            positions: HashMap::new(),
            statuses: HashMap::new(),
            watches: HashMap::new(),
            next_epoch: 0,
        };
        let task = tokio::spawn(core.run(rx));
        (Self { commands: tx }, task)
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| CoordinatorError::Stopped)?;
        rx.await.map_err(|_| CoordinatorError::Stopped)
    }

    /// Bring `count` offline machines into the ring; returns their labels.
    pub async fn add_nodes(&self, count: usize, cache_strategy: CacheStrategy, cache_size: usize) -> Result<Vec<String>> {
        self.call(|reply| Command::AddNodes {
            count,
            cache_strategy,
            cache_size,
            reply,
        })
        .await?
    }

    /// Let every server in the ring accept clients; returns how many confirmed.
    pub async fn start(&self) -> Result<usize> {
        self.call(|reply| Command::Start { reply }).await?
    }

    pub async fn stop(&self) -> Result<usize> {
        self.call(|reply| Command::Stop { reply }).await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await?
    }

    /// Planned removal; `servers` are names or `name:host:port` labels.
    pub async fn remove_nodes(&self, servers: Vec<String>) -> Result<Vec<String>> {
        self.call(|reply| Command::RemoveNodes { servers, reply }).await?
    }

    pub async fn status(&self) -> Result<ServerStatusInfo> {
        self.call(|reply| Command::Status { reply }).await
    }

    pub async fn metadata(&self) -> Result<MetadataTable> {
        self.call(|reply| Command::Metadata { reply }).await
    }
}

struct CrashWatch {
    epoch: u64,
    task: JoinHandle<()>,
}

struct CoordinatorCore {
    config: CoordinatorConfig,
    pool: MachinePool,
    launcher: Arc<dyn Launcher>,
    session: Arc<dyn CoordinationService>,
    commands: mpsc::WeakSender<Command>,
    ring: HashRing,
    // Machine name -> where it sits in the ring.
    positions: HashMap<String, RingPosition>,
    statuses: HashMap<String, NodeStatus>,
    watches: HashMap<String, CrashWatch>,
    next_epoch: u64,
}

impl CoordinatorCore {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        if let Err(err) = ensure_path(self.session.as_ref(), self.config.paths.root()).await {
            error!(error = %err, "cannot create cluster root");
        }
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        for (_, watch) in self.watches.drain() {
            watch.task.abort();
        }
        debug!("coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::AddNodes {
                count,
                cache_strategy,
                cache_size,
                reply,
            } => {
                let _ = reply.send(self.add_nodes(count, cache_strategy, cache_size).await);
            }
            Command::Start { reply } => {
                let _ = reply.send(self.start().await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(self.shutdown().await);
            }
            Command::RemoveNodes { servers, reply } => {
                let _ = reply.send(self.remove_nodes(servers, false).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Metadata { reply } => {
                let _ = reply.send(self.ring.snapshot());
            }
            Command::NodeLost { name, epoch } => self.node_lost(name, epoch).await,
        }
    }

    fn status_of(&self, name: &str) -> NodeStatus {
        self.statuses.get(name).copied().unwrap_or_default()
    }

    fn set_status(&mut self, name: &str, status: NodeStatus) {
        self.statuses.insert(name.to_string(), status);
        if let Some(node) = self.positions.get(name).and_then(|p| self.ring.get_mut(*p)) {
            node.status = status;
        }
    }

    /// Machines with a live server in the ring, in pool order.
    fn active(&self) -> Vec<Machine> {
        self.pool
            .machines()
            .iter()
            .filter(|m| self.status_of(&m.name).is_active())
            .cloned()
            .collect()
    }

    fn status(&self) -> ServerStatusInfo {
        self.pool
            .machines()
            .iter()
            .map(|m| (m.label(), self.status_of(&m.name)))
            .collect()
    }

    /// Accept a bare name or a `name:host:port` label of a server in the ring.
    fn resolve(&self, server: &str) -> Result<Machine> {
        let name = server.split(':').next().unwrap_or(server);
        self.pool
            .get(name)
            .filter(|m| server == m.name || server == m.label())
            .filter(|m| self.positions.contains_key(&m.name))
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownServer(server.to_string()))
    }

    /// Push one directive per target in parallel and wait for the
    /// acknowledgements. Returns how many confirmed.
    async fn broadcast(&self, targets: Vec<(String, DirectiveMessage)>) -> usize {
        let expected = targets.len();
        let mut group = AwaitGroup::new();
        let deadline = Instant::now() + self.config.await_timeout;
        for (address, directive) in targets {
            tokio::spawn(deliver(
                Arc::clone(&self.session),
                self.config.paths.member(&address),
                directive,
                deadline,
                group.confirmer(),
            ));
        }
        let confirmed = group.await_nodes(expected, self.config.await_timeout).await;
        if confirmed < expected {
            warn!(confirmed, expected, "continuing without every acknowledgement");
        }
        confirmed
    }

    #[instrument(skip(self))]
    async fn add_nodes(&mut self, count: usize, cache_strategy: CacheStrategy, cache_size: usize) -> Result<Vec<String>> {
        let offline: Vec<Machine> = self
            .pool
            .machines()
            .iter()
            .filter(|m| self.status_of(&m.name) == NodeStatus::Offline)
            .cloned()
            .collect();
        if count > offline.len() {
            return Err(CoordinatorError::NotEnoughMachines {
                requested: count,
                available: offline.len(),
            });
        }
        let existing = self.active();

        let mut added = Vec::with_capacity(count);
        for machine in offline.into_iter().take(count) {
            let node = Node::new(
                machine.name.clone(),
                machine.host.clone(),
                machine.port,
                cache_strategy,
                cache_size,
            );
            let position = match self.ring.place(node) {
                Ok(position) => position,
                Err(err) => {
                    error!(server = %machine.label(), error = %err, "cannot place server");
                    continue;
                }
            };
            if let Err(err) = self.launcher.launch(&machine, cache_strategy, cache_size).await {
                error!(server = %machine.label(), error = %err, "launch failed");
                self.ring.remove(position)?;
                continue;
            }
            self.positions.insert(machine.name.clone(), position);
            self.set_status(&machine.name, NodeStatus::Idle);
            added.push(machine);
        }
        if added.is_empty() {
            return Ok(Vec::new());
        }

        tokio::time::sleep(self.config.launch_grace).await;
        let mut group = AwaitGroup::new();
        let deadline = Instant::now() + self.config.await_timeout;
        for machine in &added {
            tokio::spawn(await_registration(
                Arc::clone(&self.session),
                self.config.paths.member(&machine.address()),
                deadline,
                group.confirmer(),
            ));
        }
        let registered = group.await_nodes(added.len(), self.config.await_timeout).await;
        if registered < added.len() {
            warn!(registered, launched = added.len(), "not every server registered in time");
        }

        let table = self.ring.snapshot();
        let mut targets: Vec<(String, DirectiveMessage)> = added
            .iter()
            .map(|m| (m.address(), DirectiveMessage::init(table.clone())))
            .collect();
        targets.extend(
            existing
                .iter()
                .map(|m| (m.address(), DirectiveMessage::update(table.clone()))),
        );
        self.broadcast(targets).await;

        for machine in &added {
            self.arm_crash_watch(machine);
        }
        info!(count = added.len(), ring = self.ring.len(), "servers added");
        Ok(added.iter().map(Machine::label).collect())
    }

    #[instrument(skip(self))]
    async fn start(&mut self) -> Result<usize> {
        let targets = self.active();
        let directives = targets
            .iter()
            .map(|m| (m.address(), DirectiveMessage::new(DirectiveKind::Start)))
            .collect();
        let confirmed = self.broadcast(directives).await;
        for machine in &targets {
            self.set_status(&machine.name, NodeStatus::Online);
        }
        Ok(confirmed)
    }

    #[instrument(skip(self))]
    async fn stop(&mut self) -> Result<usize> {
        let targets = self.active();
        let directives = targets
            .iter()
            .map(|m| (m.address(), DirectiveMessage::new(DirectiveKind::Stop)))
            .collect();
        let confirmed = self.broadcast(directives).await;
        for machine in &targets {
            self.set_status(&machine.name, NodeStatus::Idle);
        }
        Ok(confirmed)
    }

    #[instrument(skip(self))]
    async fn shutdown(&mut self) -> Result<()> {
        let targets = self.active();
        for machine in &targets {
            self.disarm_crash_watch(&machine.name);
        }
        let directives = targets
            .iter()
            .map(|m| (m.address(), DirectiveMessage::new(DirectiveKind::Shutdown)))
            .collect();
        self.broadcast(directives).await;
        for machine in &targets {
            if let Some(position) = self.positions.remove(&machine.name) {
                self.ring.remove(position)?;
            }
            if let Err(err) = self.launcher.terminate(&machine.name).await {
                warn!(server = %machine.label(), error = %err, "terminate failed");
            }
            self.set_status(&machine.name, NodeStatus::Offline);
        }
        info!(count = targets.len(), "cluster shut down");
        Ok(())
    }

    /// Take servers out of the ring. A planned removal lets each server hand
    /// off its data and shut down cleanly; a failure has nobody to talk to.
    #[instrument(skip(self))]
    async fn remove_nodes(&mut self, servers: Vec<String>, failure: bool) -> Result<Vec<String>> {
        let mut machines: Vec<Machine> = Vec::new();
        for server in &servers {
            let machine = self.resolve(server)?;
            if !machines.contains(&machine) {
                machines.push(machine);
            }
        }

        for machine in &machines {
            self.disarm_crash_watch(&machine.name);
            let Some(position) = self.positions.remove(&machine.name) else {
                continue;
            };
            let removal = self.ring.remove(position)?;
            let status = if failure {
                NodeStatus::Failed
            } else {
                NodeStatus::Offline
            };
            self.set_status(&machine.name, status);
            debug!(server = %machine.label(), owners_before = removal.previous.len(), "removed from ring");

            if !failure {
                let farewell = self
                    .ring
                    .snapshot()
                    .with_entry(MetadataEntry::from(&removal.node));
                let address = machine.address();
                self.broadcast(vec![(address.clone(), DirectiveMessage::update(farewell))])
                    .await;
                self.broadcast(vec![(address, DirectiveMessage::new(DirectiveKind::Shutdown))])
                    .await;
            }
            if let Err(err) = self.launcher.terminate(&machine.name).await {
                warn!(server = %machine.label(), error = %err, "terminate failed");
            }
        }

        let table = self.ring.snapshot();
        let updates = self
            .active()
            .iter()
            .map(|m| (m.address(), DirectiveMessage::update(table.clone())))
            .collect();
        self.broadcast(updates).await;
        info!(count = machines.len(), failure, ring = self.ring.len(), "servers removed");
        Ok(machines.iter().map(Machine::label).collect())
    }

    /// Replace a crashed server with a fresh one on an offline machine.
    #[instrument(skip(self))]
    async fn node_lost(&mut self, name: String, epoch: u64) {
        let current = self.watches.get(&name).map(|w| w.epoch);
        if current != Some(epoch) || !self.status_of(&name).is_active() {
            debug!("stale crash notification");
            return;
        }
        let Some(lost) = self
            .positions
            .get(&name)
            .and_then(|p| self.ring.get(*p))
            .cloned()
        else {
            return;
        };
        let was_online = self.status_of(&name) == NodeStatus::Online;
        warn!(server = %lost.label(), "server lost, replacing it");
        counter!("shardkv_crash_replacements_total").increment(1);

        if let Err(err) = self.remove_nodes(vec![name], true).await {
            error!(error = %err, "could not remove lost server");
            return;
        }
        match self.add_nodes(1, lost.cache_strategy, lost.cache_size).await {
            Ok(added) if !added.is_empty() => {
                if was_online {
                    if let Err(err) = self.start().await {
                        error!(error = %err, "could not restart cluster");
                    }
                }
                info!(replacement = %added[0], "server replaced");
            }
            Ok(_) => error!("replacement failed to launch"),
            Err(err) => error!(error = %err, "no replacement available"),
        }
    }

    fn arm_crash_watch(&mut self, machine: &Machine) {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let name = machine.name.clone();
        let marker = self.config.paths.member(&machine.address());
        let session = Arc::clone(&self.session);
        let commands = self.commands.clone();
        let task = tokio::spawn(async move {
            if watch_until_gone(session.as_ref(), &marker).await {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::NodeLost { name, epoch }).await;
                }
            }
        });
        if let Some(old) = self
            .watches
            .insert(machine.name.clone(), CrashWatch { epoch, task })
        {
            old.task.abort();
        }
    }

    fn disarm_crash_watch(&mut self, name: &str) {
        if let Some(watch) = self.watches.remove(name) {
            watch.task.abort();
        }
    }
}

/// `true` once `marker` is gone; `false` if watching it stopped being possible.
/// Re-arms after every event, since watches fire once.
async fn watch_until_gone(session: &dyn CoordinationService, marker: &str) -> bool {
    loop {
        let Ok(watch) = session.watch(marker).await else {
            return false;
        };
        match session.exists(marker).await {
            Ok(true) => {}
            Ok(false) => return true,
            Err(_) => return false,
        }
        if watch.fired().await.kind == EventKind::SessionClosed {
            return false;
        }
    }
}
