//! WebSocket transport built on tokio-tungstenite.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use protocol::{RembusError, Result};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message as WsMessage,
};

use super::{Link, LinkState, Outbound, Transport, CHANNEL_BUFFER_SIZE};

/// Opens binary WebSocket links (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates the transport.
    pub fn new() -> Self {
        Self
    }

    async fn connect(url: String) -> Result<Link> {
        tracing::debug!(%url, "opening websocket");

        let (ws_stream, _) = connect_async(&url).await.map_err(|e| {
            RembusError::Connection(format!("websocket connection to {} failed: {}", url, e))
        })?;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_BUFFER_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(LinkState::Open);
        let state_tx = Arc::new(state_tx);
        let writer_state = Arc::clone(&state_tx);

        // Writer: frames go out in submission order
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                match msg {
                    Outbound::Frame(bytes) => {
                        if let Err(e) = ws_sink.send(WsMessage::Binary(bytes)).await {
                            tracing::error!("failed to send websocket frame: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        writer_state.send_replace(LinkState::Closing);
                        if let Err(e) = ws_sink.send(WsMessage::Close(None)).await {
                            tracing::debug!("close frame not delivered: {}", e);
                            writer_state.send_replace(LinkState::Closed);
                        }
                        break;
                    }
                }
            }
        });

        // Reader: binary messages only, until the peer closes
        tokio::spawn(async move {
            while let Some(result) = ws_stream.next().await {
                match result {
                    Ok(WsMessage::Binary(bytes)) => {
                        if inbound_tx.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("websocket receive error: {}", e);
                        break;
                    }
                    _ => {
                        // Text and control frames carry no protocol traffic
                    }
                }
            }
            state_tx.send_replace(LinkState::Closed);
        });

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            state: state_rx,
        })
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str) -> Pin<Box<dyn Future<Output = Result<Link>> + Send + '_>> {
        Box::pin(Self::connect(url.to_string()))
    }
}
