//! Per-server configuration.

use std::path::PathBuf;
use std::time::Duration;

use coordination::ClusterPaths;
use corelib::CacheStrategy;

/// Everything a server process needs to come up and join the cluster.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub cache_strategy: CacheStrategy,
    pub cache_size: usize,
    pub paths: ClusterPaths,
    /// Directory for file-backed storage; `None` keeps data in memory.
    pub data_dir: Option<PathBuf>,
    /// How long a handoff waits for the receiving server's confirmation.
    pub transfer_timeout: Duration,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            cache_strategy: CacheStrategy::Fifo,
            cache_size: 100,
            paths: ClusterPaths::default(),
            data_dir: None,
            transfer_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_cache(mut self, strategy: CacheStrategy, size: usize) -> Self {
        self.cache_strategy = strategy;
        self.cache_size = size;
        self
    }

    pub fn with_paths(mut self, paths: ClusterPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
