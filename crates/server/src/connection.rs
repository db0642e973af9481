//! One client connection.

use std::sync::Arc;

use metrics::counter;
use protocol::codec::MAX_REQUEST_FRAME;
use protocol::{FrameReader, FrameWriter, KvMessage, ProtocolError, StatusType};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::agent::{Admission, NodeAgent};
use crate::error::Result;
use crate::store::{KvStore, PutOutcome};

/// Serve requests until the client disconnects or the server shuts down.
pub async fn serve_connection(stream: TcpStream, agent: Arc<NodeAgent>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read, MAX_REQUEST_FRAME);
    let mut writer = FrameWriter::new(write);
    debug!(%peer, node = %agent.address(), "client connected");

    loop {
        let frame = tokio::select! {
            frame = reader.read_message() => frame,
            _ = agent.shutdown_requested() => break,
        };
        let request = match frame {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(ProtocolError::FrameTooLong(limit)) => {
                // The rest of the line is still unread; the stream cannot be resynchronised.
                let reply = KvMessage::new(StatusType::PutError, "", format!("request exceeds {limit} bytes"));
                writer.write_message(&reply).await?;
                break;
            }
            Err(ProtocolError::Io(err)) => {
                debug!(%peer, error = %err, "connection dropped");
                break;
            }
            Err(err) => {
                writer
                    .write_message(&KvMessage::new(StatusType::GetError, "", err.to_string()))
                    .await?;
                continue;
            }
        };
        trace!(%peer, %request, "request");
        match respond(&agent, request)? {
            Some(reply) => {
                counter!("shardkv_requests_total", "status" => reply.status.as_str()).increment(1);
                writer.write_message(&reply).await?;
            }
            None => break,
        }
    }

    let _ = writer.shutdown().await;
    debug!(%peer, "client disconnected");
    Ok(())
}

/// Reply to one request, or `None` to close the connection.
pub fn respond(agent: &NodeAgent, request: KvMessage) -> Result<Option<KvMessage>> {
    let op_error = match request.status {
        StatusType::Disconnect => return Ok(None),
        StatusType::Get => StatusType::GetError,
        StatusType::Put if request.value.is_empty() => StatusType::DeleteError,
        StatusType::Put => StatusType::PutError,
        other => {
            let reason = format!("{other} is not a request");
            return Ok(Some(KvMessage::new(StatusType::GetError, request.key, reason)));
        }
    };
    if let Err(err) = request.validate_request() {
        return Ok(Some(KvMessage::new(op_error, request.key, err.to_string())));
    }

    let key = request.key.clone();
    let reply = match agent.serve(&key, |store| execute(store, request)) {
        Ok(reply) => reply,
        Err(Admission::Closed) => return Ok(None),
        Err(Admission::NotResponsible(table)) => {
            KvMessage::new(StatusType::ServerNotResponsible, key, table.to_json()?)
        }
        Err(Admission::Stopped | Admission::Serve) => KvMessage::new(StatusType::ServerStopped, key, ""),
    };
    Ok(Some(reply))
}

/// Storage failures become typed error replies; the connection stays up.
fn execute(store: &KvStore, request: KvMessage) -> KvMessage {
    let KvMessage { status, key, value } = request;
    match status {
        StatusType::Get => match store.get(&key) {
            Ok(Some(found)) => KvMessage::new(StatusType::GetSuccess, key, found),
            Ok(None) => KvMessage::new(StatusType::GetError, key, ""),
            Err(err) => KvMessage::new(StatusType::GetError, key, err.to_string()),
        },
        _ if value.is_empty() => match store.delete(&key) {
            Ok(true) => KvMessage::new(StatusType::DeleteSuccess, key, ""),
            Ok(false) => KvMessage::new(StatusType::DeleteError, key, ""),
            Err(err) => KvMessage::new(StatusType::DeleteError, key, err.to_string()),
        },
        _ => match store.put(&key, &value) {
            Ok(PutOutcome::Inserted) => KvMessage::new(StatusType::PutSuccess, key, value),
            Ok(PutOutcome::Updated) => KvMessage::new(StatusType::PutUpdate, key, value),
            Err(err) => KvMessage::new(StatusType::PutError, key, err.to_string()),
        },
    }
}
