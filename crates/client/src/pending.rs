//! In-flight requests awaiting a RESPONSE frame.
//!
//! Each request registers a one-shot slot under its correlation id before the
//! request frame is written. Exactly one of two writers consumes the entry:
//! the dispatcher on a matching RESPONSE, or the waiter when its deadline
//! passes. Whichever removes the entry from the map first wins; the other
//! side then finds nothing and does nothing. A waiter dropped before either
//! happens releases its entry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::messages::take_bytes;
use protocol::{Arg, MsgId, RembusError, Result, Status, Value};
use tokio::sync::oneshot;

/// How a RESPONSE status maps to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settler {
    /// Success or challenge resolve with the rehydrated payload.
    Default,
    /// Success means trusted, challenge yields the raw challenge bytes.
    Identity,
}

/// Value a request settles with.
#[derive(Debug)]
pub(crate) enum Settled {
    Payload(Arg),
    Trusted,
    Challenge(Vec<u8>),
}

impl Settled {
    /// The payload of a default-settled request.
    pub(crate) fn into_payload(self) -> Arg {
        match self {
            Settled::Payload(arg) => arg,
            Settled::Trusted => Arg::null(),
            Settled::Challenge(bytes) => Arg::from(bytes),
        }
    }
}

impl Settler {
    fn settle(self, status: Status, payload: Value) -> Result<Settled> {
        match (self, status) {
            (Settler::Default, Status::Success | Status::Challenge) => {
                Ok(Settled::Payload(Arg::from_tagged(payload)?))
            }
            (Settler::Identity, Status::Success) => Ok(Settled::Trusted),
            (Settler::Identity, Status::Challenge) => {
                Ok(Settled::Challenge(take_bytes(payload, "challenge")?))
            }
            (_, status) => Err(RembusError::protocol(status, reason(payload))),
        }
    }
}

/// Renders a failure payload as the reason string.
fn reason(payload: Value) -> String {
    match payload {
        Value::Text(text) => text,
        Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

struct PendingEntry {
    settler: Settler,
    tx: oneshot::Sender<Result<Settled>>,
}

type Entries = Arc<DashMap<MsgId, PendingEntry>>;

/// Receiving half of a registered request.
pub(crate) struct Waiter {
    id: MsgId,
    rx: oneshot::Receiver<Result<Settled>>,
    entries: Entries,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.entries.remove(&self.id);
    }
}

/// Correlation id → pending request.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Entries,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `id`; must happen before the request frame is written.
    pub(crate) fn register(&self, id: MsgId, settler: Settler) -> Waiter {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, PendingEntry { settler, tx });
        Waiter {
            id,
            rx,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Settles the request `id` from a RESPONSE frame.
    ///
    /// Returns false when no request is pending under `id` (late or
    /// duplicate reply).
    pub(crate) fn settle(&self, id: MsgId, status: Status, payload: Value) -> bool {
        let Some((_, entry)) = self.entries.remove(&id) else {
            return false;
        };
        let result = entry.settler.settle(status, payload);
        // The waiter may have been dropped by a cancelled caller
        let _ = entry.tx.send(result);
        true
    }

    /// Drops the entry for a request whose frame could not be written.
    pub(crate) fn cancel(&self, id: &MsgId) {
        self.entries.remove(id);
    }

    /// Waits for the request to settle, up to `timeout`.
    pub(crate) async fn wait(&self, mut waiter: Waiter, timeout: Duration) -> Result<Settled> {
        let id = waiter.id;
        match tokio::time::timeout(timeout, &mut waiter.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RembusError::Connection(format!(
                "request {} abandoned",
                id
            ))),
            Err(_) => {
                if self.entries.remove(&id).is_some() {
                    tracing::debug!(%id, ?timeout, "request timed out");
                    Err(RembusError::Timeout(format!(
                        "no response to {} within {:?}",
                        id, timeout
                    )))
                } else {
                    // The dispatcher took the entry first; its result is in flight
                    (&mut waiter.rx).await.unwrap_or_else(|_| {
                        Err(RembusError::Connection(format!("request {} abandoned", id)))
                    })
                }
            }
        }
    }

    /// Number of requests in flight.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if `id` is still awaiting a response.
    #[cfg(test)]
    pub(crate) fn contains(&self, id: &MsgId) -> bool {
        self.entries.contains_key(id)
    }
}
