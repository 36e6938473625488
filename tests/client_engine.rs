//! End-to-end tests for the client engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tcp_engine::engine::ClientEngine;
use tcp_engine::lifecycle::Shutdown;
use tcp_engine::net::Endpoint;
use tcp_engine::session::{Echo, FixedReply, ProcessorResult};
use tcp_engine::{EngineError, SessionEnd};
use tokio::sync::mpsc;

mod common;

#[tokio::test]
async fn test_client_round_trip_against_server() {
    let server = common::start_server(common::test_config(), Arc::new(Echo)).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let collector = move |input: &[u8]| -> ProcessorResult {
        let _ = tx.send(input.to_vec());
        Ok(None)
    };

    let client = ClientEngine::from_config(&common::test_config()).with_greeting(&b"hello engine"[..]);
    let client_shutdown = Shutdown::new();
    let token = client_shutdown.token();
    let endpoint = Endpoint::from(server.addr);
    let handle = tokio::spawn(async move { client.connect(&endpoint, Arc::new(collector), token).await });

    let mut received = Vec::new();
    while received.len() < b"hello engine".len() {
        let chunk = tokio::time::timeout(common::WAIT, rx.recv())
            .await
            .expect("no echo received")
            .expect("client processor dropped");
        received.extend_from_slice(&chunk);
    }
    assert_eq!(received, b"hello engine");

    client_shutdown.trigger();
    let end = tokio::time::timeout(common::WAIT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(end, SessionEnd::Cancelled);

    let summary = server.stop().await.unwrap();
    assert_eq!(summary.accepted, 1);
    assert!(summary.drained);
}

#[tokio::test]
async fn test_client_answers_server_push() {
    // Push arrives after several read timeouts have expired.
    let (addr, backend) = common::start_push_backend(b"question", Duration::from_millis(100)).await;

    let client = ClientEngine::from_config(&common::test_config());
    let end = client
        .connect(
            &Endpoint::from(addr),
            Arc::new(FixedReply::new(&b"answer"[..])),
            Shutdown::new().token(),
        )
        .await
        .unwrap();

    assert_eq!(end, SessionEnd::PeerClosed);
    assert_eq!(backend.await.unwrap(), b"answer");
}

#[tokio::test]
async fn test_connect_refused_is_fatal() {
    let addr = common::closed_port().await;

    let client = ClientEngine::from_config(&common::test_config());
    let err = client
        .connect(&Endpoint::from(addr), Arc::new(Echo), Shutdown::new().token())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Connect { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_blocking_client_stops_on_shutdown() {
    let (addr, _backend) = common::start_silent_backend().await;

    let mut config = common::test_config();
    config.socket.read_timeout_ms = 0;
    let client = ClientEngine::from_config(&config);
    let shutdown = Shutdown::new();
    let token = shutdown.token();
    let endpoint = Endpoint::from(addr);
    let handle = tokio::spawn(async move { client.connect(&endpoint, Arc::new(Echo), token).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    shutdown.trigger();

    let end = tokio::time::timeout(common::WAIT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(end, SessionEnd::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
}
