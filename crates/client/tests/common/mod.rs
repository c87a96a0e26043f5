//! Scripted in-memory broker shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rembus::{
    ClientConfig, Component, Frame, KeyStore, KeyStoreKind, MemoryKeyStore, MemoryPeer,
    MemoryTransport, MsgId, PeerSender, Status, Value,
};
use tokio::sync::mpsc;

/// Deadline used when waiting for the broker to observe something.
pub const WAIT: Duration = Duration::from_secs(2);

/// Short timeouts so failure paths finish quickly.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 1000,
        close_timeout_ms: 1000,
        request_timeout_ms: 300,
        keystore: KeyStoreKind::Memory,
        ..ClientConfig::default()
    }
}

/// Builds a component on a fresh in-memory transport.
pub fn component(
    url: &str,
    secret: Option<&str>,
    keystore: Arc<dyn KeyStore>,
) -> (Component, mpsc::UnboundedReceiver<MemoryPeer>) {
    let (transport, peers) = MemoryTransport::new();
    let mut builder = Component::builder(url)
        .config(test_config())
        .transport(Arc::new(transport))
        .keystore(keystore);
    if let Some(secret) = secret {
        builder = builder.secret(secret);
    }
    (builder.build().unwrap(), peers)
}

/// An anonymous component with an in-memory key store.
pub fn anonymous() -> (Component, mpsc::UnboundedReceiver<MemoryPeer>) {
    component("ws://broker:8000", None, Arc::new(MemoryKeyStore::new()))
}

pub fn response(id: MsgId, status: Status, payload: Value) -> Frame {
    Frame::Response {
        id,
        status,
        payload,
    }
}

/// Success RESPONSE with a null payload.
pub fn ack(id: MsgId) -> Frame {
    response(id, Status::Success, Value::Null)
}

/// Acknowledges every request frame; never replies to PUBSUB or RESPONSE.
pub fn ack_all(frame: &Frame) -> Vec<Frame> {
    match frame {
        Frame::PubSub { .. } | Frame::Response { .. } => Vec::new(),
        other => other.id().map(ack).into_iter().collect(),
    }
}

type Script = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

/// Broker that records every frame and answers through a script.
pub struct FakeBroker {
    received: Arc<Mutex<Vec<Frame>>>,
    current: Arc<Mutex<Option<PeerSender>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeBroker {
    /// Serves every link opened on `peers`.
    pub fn spawn<F>(mut peers: mpsc::UnboundedReceiver<MemoryPeer>, script: F) -> Self
    where
        F: FnMut(&Frame) -> Vec<Frame> + Send + 'static,
    {
        let received = Arc::new(Mutex::new(Vec::new()));
        let current = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));

        let broker = Self {
            received: Arc::clone(&received),
            current: Arc::clone(&current),
            connections: Arc::clone(&connections),
        };

        let mut script: Script = Box::new(script);
        tokio::spawn(async move {
            while let Some(mut peer) = peers.recv().await {
                connections.fetch_add(1, Ordering::SeqCst);
                *current.lock().unwrap() = Some(peer.sender());

                while let Some(frame) = peer.recv_frame().await {
                    received.lock().unwrap().push(frame.clone());
                    for reply in script(&frame) {
                        if peer.send_frame(reply).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        broker
    }

    /// Sends a frame to the client on the most recent link.
    pub async fn push(&self, frame: Frame) {
        let sender = self
            .current
            .lock()
            .unwrap()
            .clone()
            .expect("no client connected");
        sender.send_frame(frame).await.unwrap();
    }

    /// Every frame received so far.
    pub fn received(&self) -> Vec<Frame> {
        self.received.lock().unwrap().clone()
    }

    /// Number of links opened by the client.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Waits until a received frame matches `pred`.
    pub async fn wait_for<P>(&self, pred: P) -> Frame
    where
        P: Fn(&Frame) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(frame) = self.received().into_iter().find(|f| pred(f)) {
                return frame;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("broker never received the expected frame");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Waits until a RESPONSE for `id` was received.
    pub async fn wait_for_response(&self, id: MsgId) -> Frame {
        self.wait_for(|f| matches!(f, Frame::Response { id: rid, .. } if *rid == id))
            .await
    }
}
