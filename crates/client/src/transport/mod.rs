//! Transport seam between the protocol engine and the byte channel.
//!
//! A [`Transport`] opens a [`Link`]: an ordered duplex channel of binary
//! messages plus a watchable [`LinkState`]. The engine never touches sockets
//! directly, which lets tests and embedders swap in [`MemoryTransport`].

mod memory;
mod websocket;

use std::future::Future;
use std::pin::Pin;

use protocol::Result;
use tokio::sync::{mpsc, watch};

pub use memory::{MemoryPeer, MemoryTransport, PeerSender};
pub use websocket::WebSocketTransport;

/// Buffer size for link message channels.
pub(crate) const CHANNEL_BUFFER_SIZE: usize = 256;

/// Lifecycle of a link, mirroring a WebSocket ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Opening handshake in progress.
    Connecting,
    /// Ready to carry frames.
    Open,
    /// Close requested, waiting for the peer.
    Closing,
    /// No further traffic possible.
    Closed,
}

/// A message queued towards the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame.
    Frame(Vec<u8>),
    /// Request an orderly close.
    Close,
}

/// An open duplex channel to the broker.
#[derive(Debug)]
pub struct Link {
    /// Outbound queue; order of submission is order on the wire.
    pub outbound: mpsc::Sender<Outbound>,
    /// Inbound binary messages, in arrival order.
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Current state, updated by the transport.
    pub state: watch::Receiver<LinkState>,
}

/// Opens links to a broker URL.
pub trait Transport: Send + Sync {
    /// Opens a link to `url` (`ws://host:port` or `wss://host:port`).
    fn open(&self, url: &str) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + '_>>;
}
