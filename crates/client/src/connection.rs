//! A single TCP connection to one server.

use std::time::Duration;

use protocol::codec::MAX_REPLY_FRAME;
use protocol::{FrameReader, FrameWriter, KvMessage};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ClientError, Result};

pub struct Connection {
    address: String,
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl Connection {
    /// Connect to `host:port`, giving up after `timeout`.
    pub async fn open(address: &str, timeout: Duration) -> Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    address: address.to_string(),
                    source,
                })
            }
            Err(_) => return Err(ClientError::ConnectTimeout(address.to_string())),
        };
        stream.set_nodelay(true).map_err(|source| ClientError::Connect {
            address: address.to_string(),
            source,
        })?;
        let (read, write) = stream.into_split();
        debug!(%address, "connected");
        Ok(Self {
            address: address.to_string(),
            reader: FrameReader::new(read, MAX_REPLY_FRAME),
            writer: FrameWriter::new(write),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one request and wait for its reply.
    pub async fn request(&mut self, message: &KvMessage) -> Result<KvMessage> {
        self.writer.write_message(message).await?;
        self.reader.read_message().await?.ok_or(ClientError::Closed)
    }

    /// Say goodbye and close the stream.
    pub async fn close(mut self) -> Result<()> {
        self.writer.write_message(&KvMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        debug!(address = %self.address, "disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("address", &self.address).finish()
    }
}
