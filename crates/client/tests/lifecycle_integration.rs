//! Connection lifecycle: opening, closing and broken links.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{anonymous, response, test_config, FakeBroker};
use rembus::{
    Arg, Component, Frame, LinkState, MemoryKeyStore, MemoryTransport, RembusError, Scheme, Status,
    Value,
};

fn echo(frame: &Frame) -> Vec<Frame> {
    match frame {
        Frame::Rpc { id, args, .. } => {
            let payload = args.first().cloned().unwrap_or(Value::Null);
            vec![response(*id, Status::Success, payload)]
        }
        other => common::ack_all(other),
    }
}

#[tokio::test]
async fn test_connect_times_out_when_link_never_opens() {
    let (transport, mut peers) = MemoryTransport::new();
    let transport = transport.with_initial_state(LinkState::Connecting);
    let component = Component::builder("ws://broker:8000")
        .config(test_config())
        .transport(Arc::new(transport))
        .keystore(Arc::new(MemoryKeyStore::new()))
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = component.connect().await.unwrap_err();
    assert!(matches!(err, RembusError::Connection(_)), "{:?}", err);
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert!(component.is_closed());

    // The half-open link was asked to close
    let mut peer = peers.recv().await.unwrap();
    assert_eq!(peer.recv_raw().await, None);
}

#[tokio::test]
async fn test_connect_fails_without_broker() {
    let (component, peers) = anonymous();
    drop(peers);

    let err = component.connect().await.unwrap_err();
    assert!(matches!(err, RembusError::Connection(_)));
    assert!(!component.is_open());

    let err = component.rpc("anything", Vec::new()).await.unwrap_err();
    assert!(matches!(err, RembusError::Connection(_)));
}

#[tokio::test]
async fn test_peer_sees_url_without_identity() {
    let (component, mut peers) =
        common::component("ws://broker:9000/named", None, Arc::new(MemoryKeyStore::new()));
    tokio::spawn({
        let c = component.clone();
        async move { c.connect().await }
    });

    let peer = peers.recv().await.unwrap();
    assert_eq!(peer.url(), "ws://broker:9000");
    assert_eq!(component.cid(), Some("named"));
}

#[test]
fn test_component_urls() {
    let c = Component::new("wss://example.org:8443/sensor").unwrap();
    assert_eq!(c.endpoint().scheme, Scheme::Wss);
    assert_eq!(c.endpoint().host, "example.org");
    assert_eq!(c.endpoint().port, 8443);
    assert_eq!(c.cid(), Some("sensor"));

    let c = Component::new("ws://example.org:8000").unwrap();
    assert_eq!(c.cid(), None);

    let c = Component::new("bare_name").unwrap();
    assert_eq!(c.endpoint().url(), "ws://localhost:8000");
    assert_eq!(c.cid(), Some("bare_name"));

    match Component::new("zss://example.org:8000/x") {
        Err(RembusError::Validation(msg)) => assert!(msg.contains("invalid protocol zss"), "{}", msg),
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (component, peers) = anonymous();
    let _broker = FakeBroker::spawn(peers, echo);

    // Never connected
    assert!(component.close().await.unwrap());

    component.connect().await.unwrap();
    assert!(component.is_open());
    assert!(component.close().await.unwrap());
    assert!(component.is_closed());
    assert!(component.close().await.unwrap());
}

#[tokio::test]
async fn test_close_times_out_when_peer_ignores_it() {
    let (component, mut peers) = anonymous();
    component.connect().await.unwrap();
    // Held but never drained, so the close request is never acted upon
    let _peer = peers.recv().await.unwrap();

    let closed = component
        .close_with_timeout(Duration::from_millis(50))
        .await
        .unwrap();
    assert!(!closed);
}

#[tokio::test]
async fn test_broker_close_is_observed() {
    let (component, mut peers) = anonymous();
    component.connect().await.unwrap();
    let peer = peers.recv().await.unwrap();
    assert!(component.is_open());

    peer.close();
    assert!(component.is_closed());
    assert!(!component.is_open());
}

#[tokio::test]
async fn test_reconnects_after_close() {
    let (component, peers) = anonymous();
    let broker = FakeBroker::spawn(peers, echo);

    assert_eq!(component.rpc("echo", vec![Arg::from(1)]).await.unwrap(), Arg::from(1));
    component.close().await.unwrap();
    assert_eq!(component.rpc("echo", vec![Arg::from(2)]).await.unwrap(), Arg::from(2));
    assert_eq!(broker.connections(), 2);
}

#[tokio::test]
async fn test_malformed_inbound_is_dropped() {
    let (component, mut peers) = anonymous();
    component.connect().await.unwrap();
    let mut peer = peers.recv().await.unwrap();

    peer.send_raw(vec![0xff, 0x00, 0x13]).await.unwrap();
    peer.send_raw(Vec::new()).await.unwrap();

    let call = tokio::spawn({
        let c = component.clone();
        async move { c.rpc("still_alive", Vec::new()).await }
    });
    let id = match peer.recv_frame().await.unwrap() {
        Frame::Rpc { id, .. } => id,
        other => panic!("expected RPC frame, got {:?}", other),
    };
    peer.send_frame(response(id, Status::Success, Value::from(true)))
        .await
        .unwrap();
    assert_eq!(call.await.unwrap().unwrap(), Arg::from(true));
    assert!(component.is_open());
}
