//! Inbound frame routing.
//!
//! One dispatcher task per connection drains the link's inbound channel in
//! arrival order. RESPONSE frames settle pending requests inline. PUBSUB and
//! RPC frames are queued to a second per-connection task that runs handlers
//! one after another, in arrival order. A handler awaiting its own requests
//! never stalls the responses it is waiting for.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use protocol::{tag2table, Frame, MsgId, Status, Value};
use tokio::sync::mpsc;

use crate::component::Shared;

/// A handler invocation waiting for its turn.
type HandlerJob = BoxFuture<'static, ()>;

/// FIFO of handler invocations for one connection.
pub(crate) struct HandlerQueue {
    jobs: mpsc::UnboundedSender<HandlerJob>,
}

impl HandlerQueue {
    /// Starts the task that runs queued handlers.
    fn spawn() -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<HandlerJob>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { jobs }
    }

    fn push(&self, job: HandlerJob) {
        if self.jobs.send(job).is_err() {
            tracing::debug!("handler queue stopped, invocation dropped");
        }
    }
}

/// Starts the dispatcher for a freshly opened link.
///
/// The task ends when the link's inbound channel closes or the component is
/// dropped. Queued handlers still run to completion.
pub(crate) fn spawn(shared: Weak<Shared>, mut inbound: mpsc::Receiver<Vec<u8>>) {
    tokio::spawn(async move {
        let queue = HandlerQueue::spawn();
        while let Some(bytes) = inbound.recv().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.handle_inbound(&bytes, &queue);
        }
        tracing::debug!("dispatcher stopped");
    });
}

impl Shared {
    /// Decodes one inbound message and routes it.
    pub(crate) fn handle_inbound(self: &Arc<Self>, bytes: &[u8], queue: &HandlerQueue) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "dropping malformed frame");
                return;
            }
        };
        tracing::debug!(frame_type = frame.type_tag(), id = ?frame.id(), "received frame");

        match frame {
            Frame::Response {
                id,
                status,
                payload,
            } => {
                if !self.pending.settle(id, status, payload) {
                    tracing::debug!(%id, %status, "dropping response without pending request");
                }
            }
            Frame::PubSub { topic, args } => self.dispatch_pubsub(topic, args, queue),
            Frame::Rpc {
                id, method, args, ..
            } => self.dispatch_rpc(id, method, args, queue),
            other => {
                tracing::debug!(frame_type = other.type_tag(), "ignoring unexpected frame");
            }
        }
    }

    fn dispatch_pubsub(&self, topic: String, args: Vec<Value>, queue: &HandlerQueue) {
        let Some(handler) = self.handlers.get(&topic) else {
            tracing::debug!(%topic, "no subscriber, message dropped");
            return;
        };
        let args = match tag2table(args) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(%topic, error = %e, "undecodable pubsub arguments");
                return;
            }
        };
        let call = handler.call(self.handlers.context(), args);
        queue.push(Box::pin(async move {
            if let Err(e) = call.await {
                tracing::warn!(%topic, error = %e, "subscriber failed");
            }
        }));
    }

    fn dispatch_rpc(
        self: &Arc<Self>,
        id: MsgId,
        method: String,
        args: Vec<Value>,
        queue: &HandlerQueue,
    ) {
        // The broker answers for methods nobody exposes
        let Some(handler) = self.handlers.get(&method) else {
            tracing::debug!(%method, %id, "rpc for unexposed method ignored");
            return;
        };
        let args = match tag2table(args) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(%method, %id, error = %e, "undecodable rpc arguments");
                return;
            }
        };
        let call = handler.call(self.handlers.context(), args);
        let shared = Arc::clone(self);
        queue.push(Box::pin(async move {
            let result = match call.await {
                Ok(result) => result,
                Err(e) => {
                    // No RESPONSE is sent; the caller observes a timeout
                    tracing::warn!(%method, %id, error = %e, "rpc handler failed");
                    return;
                }
            };
            let payload = match result.into_tagged() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(%method, %id, error = %e, "rpc result not encodable");
                    return;
                }
            };
            let response = Frame::Response {
                id,
                status: Status::Success,
                payload,
            };
            if let Err(e) = shared.write(response).await {
                tracing::warn!(%method, %id, error = %e, "failed to send rpc response");
            }
        }));
    }
}
