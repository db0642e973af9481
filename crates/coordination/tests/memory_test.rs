//! Behaviour of the in-memory coordination service.

use std::time::Duration;

use coordination::{
    ensure_path, CoordinationError, CoordinationService, CreateMode, EventKind, MemoryCoordination,
};

#[tokio::test]
async fn test_create_get_set() {
    let ensemble = MemoryCoordination::new();
    let session = ensemble.connect();
    ensure_path(&session, "/kv/transfer").await.unwrap();
    assert!(session.exists("/kv").await.unwrap());

    session
        .create("/kv/a", b"one".to_vec(), CreateMode::Persistent)
        .await
        .unwrap();
    let (data, version) = session.get_data("/kv/a").await.unwrap();
    assert_eq!((data.as_slice(), version), (&b"one"[..], 0));

    let v = session.set_data("/kv/a", b"two".to_vec()).await.unwrap();
    assert_eq!(v, 1);
    assert_eq!(
        session.create("/kv/a", vec![], CreateMode::Persistent).await,
        Err(CoordinationError::NodeExists("/kv/a".into()))
    );
    assert_eq!(
        session.get_data("/kv/missing").await,
        Err(CoordinationError::NoNode("/kv/missing".into()))
    );
}

#[tokio::test]
async fn test_conditional_set_refuses_stale_version() {
    let ensemble = MemoryCoordination::new();
    let coordinator = ensemble.connect();
    let server = ensemble.connect();
    coordinator
        .create("/m", b"init".to_vec(), CreateMode::Persistent)
        .await
        .unwrap();
    let (_, read) = server.get_data("/m").await.unwrap();

    // A newer write sneaks in between the read and the conditional write.
    coordinator.set_data("/m", b"update".to_vec()).await.unwrap();
    assert_eq!(
        server.set_data_if("/m", b"ack".to_vec(), read).await,
        Err(CoordinationError::BadVersion {
            path: "/m".into(),
            expected: 0,
            actual: 1,
        })
    );
    assert_eq!(server.get_data("/m").await.unwrap(), (b"update".to_vec(), 1));

    assert_eq!(server.set_data_if("/m", b"ack".to_vec(), 1).await, Ok(2));
    assert_eq!(
        server.set_data_if("/gone", vec![], 0).await,
        Err(CoordinationError::NoNode("/gone".into()))
    );
}

#[tokio::test]
async fn test_watch_fires_once_on_change() {
    let ensemble = MemoryCoordination::new();
    let session = ensemble.connect();
    session
        .create("/n", vec![], CreateMode::Persistent)
        .await
        .unwrap();

    let watch = session.watch("/n").await.unwrap();
    session.set_data("/n", b"x".to_vec()).await.unwrap();
    let event = watch.fired().await;
    assert_eq!(event.kind, EventKind::DataChanged);

    // Not re-armed: a second change goes unnoticed by the spent watch, but a
    // fresh watch sees the next one.
    let rearmed = session.watch("/n").await.unwrap();
    session.delete("/n").await.unwrap();
    assert_eq!(rearmed.fired().await.kind, EventKind::Deleted);
}

#[tokio::test]
async fn test_ephemeral_removed_when_session_ends() {
    let ensemble = MemoryCoordination::new();
    let observer = ensemble.connect();
    ensure_path(&observer, "/kv").await.unwrap();

    let server = ensemble.connect();
    server
        .create("/kv/127.0.0.1:5000", vec![], CreateMode::Ephemeral)
        .await
        .unwrap();
    let watch = observer.watch("/kv/127.0.0.1:5000").await.unwrap();

    drop(server);
    let event = tokio::time::timeout(Duration::from_secs(1), watch.fired())
        .await
        .expect("watch should fire on session loss");
    assert_eq!(event.kind, EventKind::Deleted);
    assert!(!observer.exists("/kv/127.0.0.1:5000").await.unwrap());
}

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let ensemble = MemoryCoordination::new();
    let session = ensemble.connect();
    ensemble.expire(session.session_id());
    assert!(!ensemble.is_live(session.session_id()));
    assert_eq!(
        session.exists("/").await,
        Err(CoordinationError::SessionExpired)
    );
}

#[tokio::test]
async fn test_sequential_children_in_order() {
    let ensemble = MemoryCoordination::new();
    let session = ensemble.connect();
    ensure_path(&session, "/inbox").await.unwrap();

    let parent_watch = session.watch("/inbox").await.unwrap();
    let first = session
        .create("/inbox/msg-", b"1".to_vec(), CreateMode::PersistentSequential)
        .await
        .unwrap();
    let second = session
        .create("/inbox/msg-", b"2".to_vec(), CreateMode::PersistentSequential)
        .await
        .unwrap();
    assert_eq!(first, "/inbox/msg-0000000000");
    assert_eq!(second, "/inbox/msg-0000000001");
    assert_eq!(parent_watch.fired().await.kind, EventKind::ChildrenChanged);
    assert_eq!(
        session.children("/inbox").await.unwrap(),
        vec!["msg-0000000000".to_string(), "msg-0000000001".to_string()]
    );
    assert_eq!(
        session.delete("/inbox").await,
        Err(CoordinationError::NotEmpty("/inbox".into()))
    );
}

#[tokio::test]
async fn test_ephemeral_cannot_have_children() {
    let ensemble = MemoryCoordination::new();
    let session = ensemble.connect();
    session
        .create("/e", vec![], CreateMode::Ephemeral)
        .await
        .unwrap();
    assert!(matches!(
        session.create("/e/c", vec![], CreateMode::Persistent).await,
        Err(CoordinationError::NoChildrenForEphemerals(_))
    ));
}
