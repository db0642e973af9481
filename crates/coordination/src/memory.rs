//! In-process coordination service.
//!
//! One [`MemoryCoordination`] plays the ensemble; each participant calls
//! [`MemoryCoordination::connect`] for its own [`MemorySession`]. Ending a
//! session (explicitly, by [`MemoryCoordination::expire`], or by dropping
//! the handle) removes its ephemeral nodes, which is how a crashed server
//! becomes visible to watchers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CoordinationError, Result};
use crate::service::{CoordinationService, CreateMode, EventKind, SessionId, Version, Watch, WatchEvent};

#[derive(Debug)]
struct Znode {
    data: Vec<u8>,
    version: Version,
    ephemeral_owner: Option<SessionId>,
    next_sequence: u64,
}

impl Znode {
    fn new(data: Vec<u8>, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            version: 0,
            ephemeral_owner,
            next_sequence: 0,
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Znode>,
    watches: HashMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    live_sessions: HashSet<SessionId>,
    next_session: SessionId,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Znode::new(Vec::new(), None));
        Self {
            nodes,
            watches: HashMap::new(),
            live_sessions: HashSet::new(),
            next_session: 1,
        }
    }

    fn fire(&mut self, path: &str, kind: EventKind) {
        if let Some(waiters) = self.watches.remove(path) {
            for tx in waiters {
                let _ = tx.send(WatchEvent {
                    path: path.to_string(),
                    kind,
                });
            }
        }
    }

    fn check_session(&self, session: SessionId) -> Result<()> {
        if self.live_sessions.contains(&session) {
            Ok(())
        } else {
            Err(CoordinationError::SessionExpired)
        }
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String> {
        self.check_session(session)?;
        let parent = parent_of(path)?;
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| CoordinationError::NoNode(parent.to_string()))?;
        if parent_node.ephemeral_owner.is_some() {
            return Err(CoordinationError::NoChildrenForEphemerals(parent.to_string()));
        }
        let actual = match mode {
            CreateMode::PersistentSequential => {
                let seq = parent_node.next_sequence;
                parent_node.next_sequence += 1;
                format!("{}{:010}", path, seq)
            }
            _ => path.to_string(),
        };
        if self.nodes.contains_key(&actual) {
            return Err(CoordinationError::NodeExists(actual));
        }
        let owner = (mode == CreateMode::Ephemeral).then_some(session);
        self.nodes.insert(actual.clone(), Znode::new(data, owner));
        self.fire(&actual, EventKind::Created);
        self.fire(parent, EventKind::ChildrenChanged);
        Ok(actual)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        if path == "/" {
            return Err(CoordinationError::InvalidPath(path.to_string()));
        }
        if !self.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        if !self.children_of(path).is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }
        self.nodes.remove(path);
        self.fire(path, EventKind::Deleted);
        if let Ok(parent) = parent_of(path) {
            self.fire(parent, EventKind::ChildrenChanged);
        }
        Ok(())
    }

    fn expire(&mut self, session: SessionId) {
        if !self.live_sessions.remove(&session) {
            return;
        }
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == Some(session))
            .map(|(p, _)| p.clone())
            .collect();
        for path in owned {
            debug!(session, path = %path, "removing ephemeral node");
            let _ = self.delete(&path);
        }
    }
}

fn validate(path: &str) -> Result<()> {
    let ok = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && !path[1..].split('/').any(str::is_empty));
    if ok {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> Result<&str> {
    validate(path)?;
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Ok("/"),
        Some(idx) if idx > 0 => Ok(&path[..idx]),
        _ => Err(CoordinationError::InvalidPath(path.to_string())),
    }
}

/// The shared in-memory ensemble.
#[derive(Clone, Debug)]
pub struct MemoryCoordination {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Open a new session.
    pub fn connect(&self) -> MemorySession {
        let mut tree = self.tree.lock();
        let id = tree.next_session;
        tree.next_session += 1;
        tree.live_sessions.insert(id);
        MemorySession {
            id,
            tree: Arc::clone(&self.tree),
        }
    }

    /// End a session as if its owner had died.
    pub fn expire(&self, session: SessionId) {
        self.tree.lock().expire(session);
    }

    pub fn is_live(&self, session: SessionId) -> bool {
        self.tree.lock().live_sessions.contains(&session)
    }
}

/// One participant's session with the in-memory ensemble.
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    tree: Arc<Mutex<Tree>>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.tree.lock().expire(self.id);
    }
}

#[async_trait]
impl CoordinationService for MemorySession {
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String> {
        self.tree.lock().create(self.id, path, data, mode)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        let tree = self.tree.lock();
        tree.check_session(self.id)?;
        Ok(tree.nodes.contains_key(path))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Version)> {
        let tree = self.tree.lock();
        tree.check_session(self.id)?;
        tree.nodes
            .get(path)
            .map(|n| (n.data.clone(), n.version))
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<Version> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        node.data = data;
        node.version += 1;
        let version = node.version;
        tree.fire(path, EventKind::DataChanged);
        Ok(version)
    }

    async fn set_data_if(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))?;
        if node.version != expected {
            return Err(CoordinationError::BadVersion {
                path: path.to_string(),
                expected,
                actual: node.version,
            });
        }
        node.data = data;
        node.version += 1;
        let version = node.version;
        tree.fire(path, EventKind::DataChanged);
        Ok(version)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        tree.delete(path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.lock();
        tree.check_session(self.id)?;
        if !tree.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(tree.children_of(path))
    }

    async fn watch(&self, path: &str) -> Result<Watch> {
        validate(path)?;
        let mut tree = self.tree.lock();
        tree.check_session(self.id)?;
        let (tx, rx) = oneshot::channel();
        tree.watches.entry(path.to_string()).or_default().push(tx);
        Ok(Watch::new(path, rx))
    }

    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn close(&self) -> Result<()> {
        self.tree.lock().expire(self.id);
        Ok(())
    }
}
