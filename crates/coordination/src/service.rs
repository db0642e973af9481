//! The coordination service contract.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{CoordinationError, Result};

pub type SessionId = u64;

/// Data version of a node; bumped on every `set_data`.
pub type Version = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Deleted automatically when the creating session ends.
    Ephemeral,
    /// Persistent, with a monotonically increasing suffix appended to the name.
    PersistentSequential,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
    /// The service dropped the watch without the node changing.
    SessionClosed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: EventKind,
}

/// A one-shot notification for a single path.
///
/// Fires at most once; callers re-arm by asking for a new watch.
#[derive(Debug)]
pub struct Watch {
    path: String,
    rx: oneshot::Receiver<WatchEvent>,
}

impl Watch {
    pub fn new(path: impl Into<String>, rx: oneshot::Receiver<WatchEvent>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the event.
    pub async fn fired(self) -> WatchEvent {
        let path = self.path;
        self.rx.await.unwrap_or(WatchEvent {
            path,
            kind: EventKind::SessionClosed,
        })
    }
}

/// One participant's connection (session) to the coordination service.
#[async_trait]
pub trait CoordinationService: Send + Sync + 'static {
    /// Create a node; returns the actual path (differs for sequential nodes).
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Version)>;

    /// Replace a node's payload; returns the new version.
    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<Version>;

    /// Like `set_data`, but only while the node is still at `expected`.
    /// Fails with `BadVersion` otherwise and leaves the payload untouched.
    async fn set_data_if(&self, path: &str, data: Vec<u8>, expected: Version) -> Result<Version>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Child names (not full paths), sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Arm a one-shot watch on `path`, whether or not it exists yet.
    async fn watch(&self, path: &str) -> Result<Watch>;

    fn session_id(&self) -> SessionId;

    /// End the session, deleting its ephemeral nodes.
    async fn close(&self) -> Result<()>;
}

/// Create `path` and any missing ancestors as persistent nodes.
pub async fn ensure_path<C: CoordinationService + ?Sized>(service: &C, path: &str) -> Result<()> {
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match service
            .create(&current, Vec::new(), CreateMode::Persistent)
            .await
        {
            Ok(_) | Err(CoordinationError::NodeExists(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
