use std::sync::Arc;
use std::time::Duration;

use coordination::{ClusterPaths, CoordinationService, MemoryCoordination, MemorySession};
use corelib::{CacheStrategy, HashRing, Node};
use protocol::codec::MAX_REPLY_FRAME;
use protocol::{DirectiveKind, DirectiveMessage, FrameReader, FrameWriter, KvMessage, StatusType};
use server::{KvServer, ServerConfig};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct Client {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl Client {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: FrameReader::new(read, MAX_REPLY_FRAME),
            writer: FrameWriter::new(write),
        }
    }

    async fn send(&mut self, request: KvMessage) -> KvMessage {
        self.writer.write_message(&request).await.unwrap();
        self.reader.read_message().await.unwrap().unwrap()
    }
}

async fn push(session: &dyn CoordinationService, path: &str, directive: DirectiveMessage) {
    session.set_data(path, directive.encode().unwrap()).await.unwrap();
    for _ in 0..200 {
        let Ok((data, _)) = session.get_data(path).await else {
            // Marker already gone: the server has acted on a SHUTDOWN.
            return;
        };
        let echoed = DirectiveMessage::decode(&data).unwrap();
        if !echoed.is_from_coordinator() && echoed.kind == directive.kind {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no acknowledgement for {}", directive.kind);
}

async fn wait_for_marker(session: &dyn CoordinationService, path: &str) {
    for _ in 0..200 {
        if session.exists(path).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{path} never appeared");
}

type ServerTask = tokio::task::JoinHandle<server::Result<()>>;

/// A started single-server cluster: the coordinator's session, the port and the server task.
async fn single_server(ensemble: &MemoryCoordination) -> (MemorySession, u16, ServerTask) {
    let port = free_port();
    let config = ServerConfig::new("server1", "127.0.0.1", port).with_cache(CacheStrategy::Fifo, 8);
    let server = KvServer::bind(config, Arc::new(ensemble.connect())).await.unwrap();
    let handle = tokio::spawn(server.run());

    let coordinator = ensemble.connect();
    let marker = ClusterPaths::default().member(&format!("127.0.0.1:{port}"));
    wait_for_marker(&coordinator, &marker).await;

    let mut ring = HashRing::new();
    ring.place(Node::new("server1", "127.0.0.1", port, CacheStrategy::Fifo, 8))
        .unwrap();
    push(&coordinator, &marker, DirectiveMessage::init(ring.snapshot())).await;
    push(&coordinator, &marker, DirectiveMessage::new(DirectiveKind::Start)).await;
    (coordinator, port, handle)
}

#[tokio::test]
async fn test_put_get_delete_cycle() {
    let ensemble = MemoryCoordination::new();
    let (_coordinator, port, _server) = single_server(&ensemble).await;
    let mut client = Client::connect(port).await;

    let reply = client.send(KvMessage::put("k", "v")).await;
    assert_eq!(reply.status, StatusType::PutSuccess);
    let reply = client.send(KvMessage::put("k", "w")).await;
    assert_eq!(reply.status, StatusType::PutUpdate);

    let reply = client.send(KvMessage::get("k")).await;
    assert_eq!(reply, KvMessage::new(StatusType::GetSuccess, "k", "w"));

    let reply = client.send(KvMessage::put("k", "")).await;
    assert_eq!(reply.status, StatusType::DeleteSuccess);
    let reply = client.send(KvMessage::get("k")).await;
    assert_eq!(reply.status, StatusType::GetError);
    let reply = client.send(KvMessage::put("k", "")).await;
    assert_eq!(reply.status, StatusType::DeleteError);
}

#[tokio::test]
async fn test_invalid_requests_get_error_replies() {
    let ensemble = MemoryCoordination::new();
    let (_coordinator, port, _server) = single_server(&ensemble).await;
    let mut client = Client::connect(port).await;

    let reply = client.send(KvMessage::get("a-key-well-over-twenty-bytes")).await;
    assert_eq!(reply.status, StatusType::GetError);
    let reply = client.send(KvMessage::put("k", "bad\u{7f}")).await;
    assert_eq!(reply.status, StatusType::PutError);
    let reply = client.send(KvMessage::new(StatusType::GetSuccess, "k", "")).await;
    assert_eq!(reply.status, StatusType::GetError);

    // The connection survives all of the above.
    let reply = client.send(KvMessage::put("k", "ok")).await;
    assert_eq!(reply.status, StatusType::PutSuccess);
}

#[tokio::test]
async fn test_stopped_server_rejects_clients() {
    let ensemble = MemoryCoordination::new();
    let (coordinator, port, _server) = single_server(&ensemble).await;
    let marker = ClusterPaths::default().member(&format!("127.0.0.1:{port}"));
    let mut client = Client::connect(port).await;

    push(&coordinator, &marker, DirectiveMessage::new(DirectiveKind::Stop)).await;
    let reply = client.send(KvMessage::get("k")).await;
    assert_eq!(reply.status, StatusType::ServerStopped);

    push(&coordinator, &marker, DirectiveMessage::new(DirectiveKind::Start)).await;
    let reply = client.send(KvMessage::put("k", "v")).await;
    assert_eq!(reply.status, StatusType::PutSuccess);
}

#[tokio::test]
async fn test_shutdown_closes_server_and_marker() {
    let ensemble = MemoryCoordination::new();
    let (coordinator, port, server) = single_server(&ensemble).await;
    let marker = ClusterPaths::default().member(&format!("127.0.0.1:{port}"));

    push(&coordinator, &marker, DirectiveMessage::new(DirectiveKind::Shutdown)).await;
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!coordinator.exists(&marker).await.unwrap());
}
