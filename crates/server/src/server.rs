//! TCP front end of one storage server.

use std::net::SocketAddr;
use std::sync::Arc;

use coordination::CoordinationService;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::agent::NodeAgent;
use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::error::Result;
use crate::store::KvStore;

pub struct KvServer {
    config: ServerConfig,
    listener: TcpListener,
    agent: Arc<NodeAgent>,
    coordination: Arc<dyn CoordinationService>,
}

impl KvServer {
    /// Open storage and bind the listening socket. Nothing is visible to the
    /// cluster until [`run`](Self::run).
    pub async fn bind(config: ServerConfig, coordination: Arc<dyn CoordinationService>) -> Result<Self> {
        let store = Arc::new(KvStore::from_config(&config)?);
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let agent = Arc::new(NodeAgent::new(
            config.address(),
            config.paths.clone(),
            store,
            Arc::clone(&coordination),
            config.transfer_timeout,
        ));
        Ok(Self {
            config,
            listener,
            agent,
            coordination,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn agent(&self) -> Arc<NodeAgent> {
        Arc::clone(&self.agent)
    }

    /// Join the cluster and serve until SHUTDOWN or loss of the session.
    #[instrument(skip(self), fields(server = %self.config.name, address = %self.config.address()))]
    pub async fn run(self) -> Result<()> {
        self.agent.register().await?;
        let mut directives = tokio::spawn(Arc::clone(&self.agent).run_directives());
        let inbox = tokio::spawn(Arc::clone(&self.agent).run_inbox());
        let mut connections = JoinSet::new();
        info!("accepting connections");

        let finished = loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(serve_connection(stream, Arc::clone(&self.agent)));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    if let Ok(Err(err)) = done {
                        debug!(error = %err, "connection ended with error");
                    }
                }
                _ = self.agent.shutdown_requested() => break None,
                done = &mut directives => break Some(done),
            }
        };
        drop(self.listener);

        let directive_outcome = match finished {
            Some(done) => done,
            None => directives.await,
        };
        match directive_outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "directive loop failed"),
            Err(err) => warn!(error = %err, "directive loop panicked"),
        }
        // Connections and the inbox follow the shutdown signal; if the marker
        // vanished instead, nothing will signal them.
        if !self.agent.is_shut_down() {
            connections.abort_all();
            inbox.abort();
        }
        while connections.join_next().await.is_some() {}
        let _ = inbox.await;

        self.coordination.close().await?;
        info!("server stopped");
        Ok(())
    }
}
