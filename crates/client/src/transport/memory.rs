//! In-process transport that hands the broker side of each link to the caller.
//!
//! Used by the test suite to script broker behaviour frame by frame.

use std::future::Future;
use std::pin::Pin;

use protocol::{Frame, RembusError, Result};
use tokio::sync::{mpsc, watch};

use super::{Link, LinkState, Outbound, Transport, CHANNEL_BUFFER_SIZE};

/// Transport whose links terminate in [`MemoryPeer`]s.
#[derive(Debug)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    initial_state: LinkState,
}

impl MemoryTransport {
    /// Creates a transport and the receiver on which opened peers arrive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                initial_state: LinkState::Open,
            },
            rx,
        )
    }

    /// Sets the state new links start in.
    ///
    /// A link left in [`LinkState::Connecting`] never opens unless the peer
    /// calls [`MemoryPeer::open`].
    pub fn with_initial_state(mut self, state: LinkState) -> Self {
        self.initial_state = state;
        self
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &str) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + '_>> {
        let url = url.to_string();
        Box::pin(async move {
            let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
            let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
            let (state_tx, state_rx) = watch::channel(self.initial_state);

            let peer = MemoryPeer {
                url,
                incoming: outbound_rx,
                outgoing: inbound_tx,
                state: state_tx,
            };
            self.peers
                .send(peer)
                .map_err(|_| RembusError::Connection("no broker listening".to_string()))?;

            Ok(Link {
                outbound: outbound_tx,
                inbound: inbound_rx,
                state: state_rx,
            })
        })
    }
}

/// Broker end of an in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    incoming: mpsc::Receiver<Outbound>,
    outgoing: mpsc::Sender<Vec<u8>>,
    state: watch::Sender<LinkState>,
}

impl MemoryPeer {
    /// URL the client asked for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Moves a connecting link to the open state.
    pub fn open(&self) {
        self.state.send_replace(LinkState::Open);
    }

    /// Receives the next raw message from the client.
    ///
    /// Returns `None` once the client asked to close or dropped the link; the
    /// link is then marked closed.
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        match self.incoming.recv().await {
            Some(Outbound::Frame(bytes)) => Some(bytes),
            Some(Outbound::Close) | None => {
                self.close();
                None
            }
        }
    }

    /// Receives and decodes the next frame from the client.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        let bytes = self.recv_raw().await?;
        match Frame::decode(&bytes) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!("memory peer received malformed frame: {}", e);
                None
            }
        }
    }

    /// Returns a cloneable handle for sending to the client from other tasks.
    pub fn sender(&self) -> PeerSender {
        PeerSender {
            outgoing: self.outgoing.clone(),
        }
    }

    /// Sends raw bytes to the client.
    pub async fn send_raw(&self, bytes: Vec<u8>) -> Result<()> {
        send_to_client(&self.outgoing, bytes).await
    }

    /// Encodes and sends a frame to the client.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.send_raw(frame.encode()?).await
    }

    /// Marks the link closed from the broker side.
    pub fn close(&self) {
        self.state.send_replace(LinkState::Closed);
    }
}

/// Sending half of a [`MemoryPeer`].
#[derive(Debug, Clone)]
pub struct PeerSender {
    outgoing: mpsc::Sender<Vec<u8>>,
}

impl PeerSender {
    /// Encodes and sends a frame to the client.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        send_to_client(&self.outgoing, frame.encode()?).await
    }
}

async fn send_to_client(outgoing: &mpsc::Sender<Vec<u8>>, bytes: Vec<u8>) -> Result<()> {
    outgoing
        .send(bytes)
        .await
        .map_err(|_| RembusError::Connection("client link dropped".to_string()))
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        self.close();
    }
}
