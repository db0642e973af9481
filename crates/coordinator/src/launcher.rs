//! Bringing server processes up and down.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::{ClusterPaths, CoordinationService, MemoryCoordination, SessionId};
use corelib::CacheStrategy;
use parking_lot::Mutex;
use server::{KvServer, ServerConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::pool::Machine;

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Start a server for `machine`. It registers itself with the
    /// coordination service once it is up.
    async fn launch(&self, machine: &Machine, cache_strategy: CacheStrategy, cache_size: usize) -> Result<()>;

    /// Make sure the server on `name` is gone. Safe to call for a server
    /// that already exited or crashed.
    async fn terminate(&self, name: &str) -> Result<()>;
}

struct Running {
    task: JoinHandle<server::Result<()>>,
    session: SessionId,
}

/// Runs each server as a tokio task in this process, each with its own
/// session on a shared in-memory ensemble.
pub struct LocalLauncher {
    ensemble: MemoryCoordination,
    paths: ClusterPaths,
    data_dir: Option<PathBuf>,
    exit_grace: Duration,
    running: Mutex<HashMap<String, Running>>,
}

impl LocalLauncher {
    pub fn new(ensemble: MemoryCoordination, paths: ClusterPaths) -> Self {
        Self {
            ensemble,
            paths,
            data_dir: None,
            exit_grace: Duration::from_secs(2),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Persist each server's data under `dir` instead of in memory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .get(name)
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Simulate a crash: the server disappears without any SHUTDOWN, and
    /// its session dies with it.
    pub fn kill(&self, name: &str) -> Result<()> {
        let running = self
            .running
            .lock()
            .remove(name)
            .ok_or_else(|| CoordinatorError::UnknownServer(name.to_string()))?;
        running.task.abort();
        self.ensemble.expire(running.session);
        warn!(server = %name, "killed");
        Ok(())
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn launch(&self, machine: &Machine, cache_strategy: CacheStrategy, cache_size: usize) -> Result<()> {
        let mut config = ServerConfig::new(machine.name.clone(), machine.host.clone(), machine.port)
            .with_cache(cache_strategy, cache_size)
            .with_paths(self.paths.clone());
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        let session = self.ensemble.connect();
        let session_id = session.session_id();
        let server = KvServer::bind(config, Arc::new(session))
            .await
            .map_err(|e| CoordinatorError::Launch {
                name: machine.name.clone(),
                reason: e.to_string(),
            })?;
        let task = tokio::spawn(server.run());
        self.running.lock().insert(
            machine.name.clone(),
            Running {
                task,
                session: session_id,
            },
        );
        info!(server = %machine.label(), "launched");
        Ok(())
    }

    async fn terminate(&self, name: &str) -> Result<()> {
        let Some(mut running) = self.running.lock().remove(name) else {
            return Ok(());
        };
        match tokio::time::timeout(self.exit_grace, &mut running.task).await {
            Ok(Ok(Ok(()))) => debug!(server = %name, "exited"),
            Ok(Ok(Err(err))) => warn!(server = %name, error = %err, "exited with error"),
            Ok(Err(err)) => warn!(server = %name, error = %err, "task failed"),
            Err(_) => {
                warn!(server = %name, "did not exit in time, aborting");
                running.task.abort();
            }
        }
        self.ensemble.expire(running.session);
        Ok(())
    }
}
