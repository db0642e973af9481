//! Line-delimited framing of [`KvMessage`]s over tokio streams.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ProtocolError, Result};
use crate::message::{KvMessage, MAX_KEY_LEN, MAX_VALUE_LEN, TERMINATOR};

/// Largest request a server accepts: status, separators and the key/value limits.
pub const MAX_REQUEST_FRAME: usize = MAX_KEY_LEN + MAX_VALUE_LEN + 64;

/// Replies may carry a whole metadata table, so clients read with a wider limit.
pub const MAX_REPLY_FRAME: usize = 16 * 1024 * 1024;

pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_len: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_len,
            buf: Vec::with_capacity(256),
        }
    }

    /// Next message, or `None` once the peer has closed the stream.
    pub async fn read_message(&mut self) -> Result<Option<KvMessage>> {
        self.buf.clear();
        let limit = self.max_len as u64 + 1;
        let read = (&mut self.inner)
            .take(limit)
            .read_until(TERMINATOR, &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if self.buf.last() != Some(&TERMINATOR) {
            if self.buf.len() > self.max_len {
                return Err(ProtocolError::FrameTooLong(self.max_len));
            }
            return Err(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        KvMessage::decode(&self.buf).map(Some)
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_message(&mut self, msg: &KvMessage) -> Result<()> {
        self.inner.write_all(&msg.encode()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
