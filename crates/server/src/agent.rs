//! Server-side membership handling.
//!
//! The agent owns this server's view of the cluster: the latest metadata
//! table, the range derived from it, and whether client traffic is allowed.
//! Two loops feed it. The directive loop follows the presence marker, where
//! the coordinator writes directives and the agent writes acknowledgements.
//! The inbox loop drains data handed over by other servers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use coordination::{ensure_path, ClusterPaths, CoordinationError, CoordinationService, CreateMode, EventKind};
use corelib::{hash_key, KeyRange, MetadataTable};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use protocol::{DirectiveKind, DirectiveMessage};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::store::KvStore;

/// Verdict on a client request before it reaches the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Serve,
    /// Not started yet, or stopped by the coordinator.
    Stopped,
    /// The key belongs elsewhere; the table tells the client where.
    NotResponsible(MetadataTable),
    /// Shutting down; drop the connection.
    Closed,
}

#[derive(Debug, Default)]
struct AgentState {
    metadata: MetadataTable,
    range: KeyRange,
    accepting: bool,
    shut_down: bool,
}

pub struct NodeAgent {
    address: String,
    paths: ClusterPaths,
    store: Arc<KvStore>,
    coordination: Arc<dyn CoordinationService>,
    transfer_timeout: Duration,
    state: RwLock<AgentState>,
    // Receiver address -> waiter for its TRANSFER_DATA_COMPLETE.
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
    shutdown: watch::Sender<bool>,
}

impl NodeAgent {
    pub fn new(
        address: impl Into<String>,
        paths: ClusterPaths,
        store: Arc<KvStore>,
        coordination: Arc<dyn CoordinationService>,
        transfer_timeout: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            address: address.into(),
            paths,
            store,
            coordination,
            transfer_timeout,
            state: RwLock::new(AgentState::default()),
            pending: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    pub fn range(&self) -> KeyRange {
        self.state.read().range
    }

    pub fn metadata(&self) -> MetadataTable {
        self.state.read().metadata.clone()
    }

    pub fn is_accepting(&self) -> bool {
        self.state.read().accepting
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.read().shut_down
    }

    /// Resolves once a SHUTDOWN directive has been applied, even if that
    /// happened before the call.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|down| *down).await;
    }

    pub fn admit(&self, key: &str) -> Admission {
        verdict(&self.state.read(), key)
    }

    /// Run `op` against the store if `key` is admitted, holding the range
    /// steady until it returns. An UPDATE switches the range only after
    /// admitted operations finish, so its handoff sees their writes.
    pub fn serve<R>(&self, key: &str, op: impl FnOnce(&KvStore) -> R) -> std::result::Result<R, Admission> {
        let state = self.state.read();
        match verdict(&state, key) {
            Admission::Serve => Ok(op(&self.store)),
            refused => Err(refused),
        }
    }

    /// Create the inbox and the ephemeral presence marker.
    ///
    /// The inbox exists before the marker does, so anyone who has seen the
    /// marker can post transfers.
    pub async fn register(&self) -> Result<()> {
        ensure_path(self.coordination.as_ref(), &self.paths.inbox(&self.address)).await?;
        self.coordination
            .create(&self.paths.member(&self.address), Vec::new(), CreateMode::Ephemeral)
            .await?;
        info!(node = %self.address, "registered with coordination service");
        Ok(())
    }

    /// Apply one coordinator directive.
    #[instrument(skip(self, directive), fields(node = %self.address, kind = %directive.kind))]
    pub async fn apply(&self, directive: &DirectiveMessage) -> Result<()> {
        match directive.kind {
            DirectiveKind::Init => {
                let table = directive.metadata.clone().unwrap_or_default();
                let mut state = self.state.write();
                state.range = table.range_of(&self.address);
                state.metadata = table;
                debug!(range = %state.range, "initialised");
            }
            DirectiveKind::Start => self.state.write().accepting = true,
            DirectiveKind::Stop => self.state.write().accepting = false,
            DirectiveKind::Update => {
                let table = directive.metadata.clone().unwrap_or_default();
                self.apply_update(table).await?;
            }
            DirectiveKind::Shutdown => {
                {
                    let mut state = self.state.write();
                    state.accepting = false;
                    state.shut_down = true;
                }
                self.shutdown.send_replace(true);
            }
            DirectiveKind::TransferData | DirectiveKind::TransferDataComplete => {
                warn!("handoff message on the directive slot, ignoring");
            }
        }
        Ok(())
    }

    async fn apply_update(&self, table: MetadataTable) -> Result<()> {
        let range = table.range_of(&self.address);
        let previous = {
            let mut state = self.state.write();
            let previous = state.range;
            state.range = range;
            state.metadata = table.clone();
            previous
        };
        if previous != range {
            info!(from = %previous, to = %range, "range changed");
        }

        let mut outgoing: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (key, value) in self.store.entries()? {
            if range.contains(hash_key(&key)) {
                continue;
            }
            match table.owner_of_key(&key) {
                Some(owner) if owner.address() != self.address => {
                    outgoing.entry(owner.address()).or_default().insert(key, value);
                }
                // Nobody else can take it; keep it.
                _ => {}
            }
        }
        for (owner, key_values) in outgoing {
            self.hand_off(&owner, key_values).await?;
        }
        Ok(())
    }

    /// Post `key_values` to `owner` and drop them locally once it confirms.
    /// Keys are kept if no confirmation arrives in time.
    async fn hand_off(&self, owner: &str, key_values: BTreeMap<String, String>) -> Result<()> {
        let count = key_values.len();
        let keys: Vec<String> = key_values.keys().cloned().collect();
        let payload = DirectiveMessage::transfer(key_values, self.address.clone()).encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(owner.to_string(), tx);
        if let Err(err) = self
            .coordination
            .create(&self.paths.inbox_message(owner), payload, CreateMode::PersistentSequential)
            .await
        {
            self.pending.lock().remove(owner);
            warn!(%owner, error = %err, "could not post transfer, keeping keys");
            return Ok(());
        }

        match tokio::time::timeout(self.transfer_timeout, rx).await {
            Ok(Ok(())) => {
                for key in &keys {
                    self.store.delete(key)?;
                }
                counter!("shardkv_transfers_total", "direction" => "sent").increment(1);
                info!(%owner, count, "handed off keys");
            }
            _ => {
                self.pending.lock().remove(owner);
                warn!(%owner, count, "transfer not confirmed, keeping keys");
            }
        }
        Ok(())
    }

    async fn receive(&self, message: DirectiveMessage) -> Result<()> {
        let Some(sender) = message.sender.clone() else {
            warn!(node = %self.address, kind = %message.kind, "inbox message without sender");
            return Ok(());
        };
        match message.kind {
            DirectiveKind::TransferData => {
                let key_values = message.key_values.unwrap_or_default();
                for (key, value) in &key_values {
                    self.store.put(key, value)?;
                }
                counter!("shardkv_transfers_total", "direction" => "received").increment(1);
                debug!(node = %self.address, %sender, count = key_values.len(), "received keys");
                let reply = DirectiveMessage::transfer_complete(self.address.clone()).encode()?;
                self.coordination
                    .create(&self.paths.inbox_message(&sender), reply, CreateMode::PersistentSequential)
                    .await?;
            }
            DirectiveKind::TransferDataComplete => {
                if let Some(waiter) = self.pending.lock().remove(&sender) {
                    let _ = waiter.send(());
                }
            }
            other => warn!(node = %self.address, kind = %other, "unexpected inbox message"),
        }
        Ok(())
    }

    /// Follow the presence marker until it disappears or SHUTDOWN is applied.
    pub async fn run_directives(self: Arc<Self>) -> Result<()> {
        let marker = self.paths.member(&self.address);
        let mut seen = 0;
        loop {
            let watch = self.coordination.watch(&marker).await?;
            let (data, version) = match self.coordination.get_data(&marker).await {
                Ok(found) => found,
                Err(CoordinationError::NoNode(_)) => break,
                Err(err) => return Err(err.into()),
            };
            if version > seen && !data.is_empty() {
                seen = version;
                match DirectiveMessage::decode(&data) {
                    Ok(directive) if directive.is_from_coordinator() => {
                        self.apply(&directive).await?;
                        let ack = directive.acknowledgement(self.address.clone()).encode()?;
                        match self.coordination.set_data_if(&marker, ack, version).await {
                            Ok(acked) => seen = acked,
                            // A newer directive landed while applying; answer that one instead.
                            Err(CoordinationError::BadVersion { .. }) => {}
                            Err(CoordinationError::NoNode(_)) => break,
                            Err(err) => return Err(err.into()),
                        }
                        if directive.kind == DirectiveKind::Shutdown {
                            break;
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(node = %self.address, error = %err, "undecodable directive"),
                }
            }
            tokio::select! {
                event = watch.fired() => {
                    if matches!(event.kind, EventKind::Deleted | EventKind::SessionClosed) {
                        break;
                    }
                }
                _ = self.shutdown_requested() => break,
            }
        }
        debug!(node = %self.address, "directive loop finished");
        Ok(())
    }

    /// Drain the transfer inbox, oldest message first.
    pub async fn run_inbox(self: Arc<Self>) -> Result<()> {
        let inbox = self.paths.inbox(&self.address);
        loop {
            let watch = self.coordination.watch(&inbox).await?;
            let children = match self.coordination.children(&inbox).await {
                Ok(children) => children,
                Err(CoordinationError::NoNode(_)) => break,
                Err(err) => return Err(err.into()),
            };
            for child in children {
                let path = format!("{inbox}/{child}");
                let data = match self.coordination.get_data(&path).await {
                    Ok((data, _)) => data,
                    Err(CoordinationError::NoNode(_)) => continue,
                    Err(err) => return Err(err.into()),
                };
                match self.coordination.delete(&path).await {
                    Ok(()) | Err(CoordinationError::NoNode(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                match DirectiveMessage::decode(&data) {
                    Ok(message) => self.receive(message).await?,
                    Err(err) => warn!(node = %self.address, error = %err, "undecodable inbox message"),
                }
            }
            tokio::select! {
                event = watch.fired() => {
                    if matches!(event.kind, EventKind::Deleted | EventKind::SessionClosed) {
                        break;
                    }
                }
                _ = self.shutdown_requested() => break,
            }
        }
        debug!(node = %self.address, "inbox loop finished");
        Ok(())
    }
}

fn verdict(state: &AgentState, key: &str) -> Admission {
    if state.shut_down {
        Admission::Closed
    } else if !state.accepting {
        Admission::Stopped
    } else if !state.range.contains(hash_key(key)) {
        Admission::NotResponsible(state.metadata.clone())
    } else {
        Admission::Serve
    }
}

impl std::fmt::Debug for NodeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeAgent")
            .field("address", &self.address)
            .field("state", &*self.state.read())
            .finish()
    }
}
