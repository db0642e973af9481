//! Ownership-aware request routing.
//!
//! The router caches the last metadata table it was handed and sends each
//! request to the server that table names as owner of the key. A server that
//! disagrees answers `SERVER_NOT_RESPONSIBLE` with its own table; the router
//! adopts that table, moves to the new owner and retries exactly once.
//! When the connected server disappears, the router moves to another server
//! from its table and lets that server's answer redirect it.

use std::time::Duration;

use corelib::MetadataTable;
use metrics::counter;
use protocol::{KvMessage, StatusType};
use tracing::{debug, info, instrument, warn};

use crate::connection::Connection;
use crate::error::{ClientError, Result};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct ClientRouter {
    metadata: MetadataTable,
    connection: Option<Connection>,
    connect_timeout: Duration,
}

impl ClientRouter {
    /// Connect to any server of the cluster; metadata starts out empty.
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_with_timeout(address, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(address: &str, connect_timeout: Duration) -> Result<Self> {
        let connection = Connection::open(address, connect_timeout).await?;
        Ok(Self {
            metadata: MetadataTable::new(),
            connection: Some(connection),
            connect_timeout,
        })
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// Replace the cached table, e.g. with one obtained out of band.
    pub fn set_metadata(&mut self, metadata: MetadataTable) {
        self.metadata = metadata;
    }

    pub fn connected_to(&self) -> Option<&str> {
        self.connection.as_ref().map(Connection::address)
    }

    /// Address that should serve `key`: the cached owner, or whatever server
    /// we are connected to when the table has nothing to say.
    pub fn resolve(&self, key: &str) -> Option<String> {
        self.metadata
            .owner_of_key(key)
            .map(|entry| entry.address())
            .or_else(|| self.connected_to().map(str::to_string))
    }

    pub async fn get(&mut self, key: &str) -> Result<KvMessage> {
        self.request(KvMessage::get(key)).await
    }

    /// An empty `value` deletes the key.
    pub async fn put(&mut self, key: &str, value: &str) -> Result<KvMessage> {
        self.request(KvMessage::put(key, value)).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<KvMessage> {
        self.request(KvMessage::put(key, "")).await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    #[instrument(skip(self, message), fields(key = %message.key, op = %message.status))]
    async fn request(&mut self, message: KvMessage) -> Result<KvMessage> {
        message.validate_request()?;
        if let Some(owner) = self.resolve(&message.key) {
            // Best effort: on failure we stay where we are and let the server redirect us.
            if let Err(err) = self.switch_to(&owner).await {
                debug!(%owner, error = %err, "owner unreachable, using current connection");
            }
        }

        let reply = self.send_or_fail_over(&message).await?;
        if reply.status != StatusType::ServerNotResponsible {
            return Ok(reply);
        }

        counter!("shardkv_client_redirects_total").increment(1);
        self.metadata = MetadataTable::from_json(&reply.value)?;
        let Some(owner) = self.resolve(&message.key) else {
            return Ok(reply);
        };
        if let Err(err) = self.switch_to(&owner).await {
            warn!(%owner, error = %err, "redirect target unreachable");
            return Ok(reply);
        }
        info!(%owner, "redirected");

        let retried = self.send(&message).await?;
        if retried.status == StatusType::ServerNotResponsible {
            self.metadata = MetadataTable::from_json(&retried.value)?;
            return Err(ClientError::Redirect {
                key: message.key,
                address: owner,
            });
        }
        Ok(retried)
    }

    async fn send(&mut self, message: &KvMessage) -> Result<KvMessage> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        connection.request(message).await
    }

    /// Send on the current connection. If that server is gone, move to any
    /// other server in the cached table and send once more there; its reply
    /// redirects us if the key now lives elsewhere.
    async fn send_or_fail_over(&mut self, message: &KvMessage) -> Result<KvMessage> {
        let err = match self.send(message).await {
            Err(err) if err.is_connection_lost() => err,
            other => return other,
        };
        let lost = self.connection.take().map(|c| c.address().to_string());
        warn!(lost = ?lost, error = %err, "connection lost");

        let candidates: Vec<String> = self
            .metadata
            .addresses()
            .filter(|address| Some(*address) != lost.as_deref())
            .map(str::to_string)
            .collect();
        for address in candidates {
            match Connection::open(&address, self.connect_timeout).await {
                Ok(fresh) => {
                    info!(%address, "failed over");
                    self.connection = Some(fresh);
                    return self.send(message).await;
                }
                Err(open_err) => debug!(%address, error = %open_err, "failover target unreachable"),
            }
        }
        Err(err)
    }

    /// Make `address` the current connection. The old connection is only
    /// given up once the new one is open.
    async fn switch_to(&mut self, address: &str) -> Result<()> {
        if self.connected_to() == Some(address) {
            return Ok(());
        }
        let fresh = Connection::open(address, self.connect_timeout).await?;
        if let Some(old) = self.connection.replace(fresh) {
            let _ = old.close().await;
        }
        Ok(())
    }
}
