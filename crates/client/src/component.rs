//! The Rembus component: one broker connection multiplexing RPC, pub/sub and
//! identity provisioning.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use protocol::{
    table2tag, Arg, Frame, MsgId, RembusError, Result, SettingCommand, SettingKind,
};
use tokio::sync::{mpsc, watch, Mutex};

use crate::auth::AuthState;
use crate::config::ClientConfig;
use crate::dispatcher;
use crate::endpoint::Endpoint;
use crate::handlers::{handler_fn, Handler, HandlerRegistry, SharedContext, TopicRef};
use crate::keystore::{self, KeyStore};
use crate::pending::{PendingRequests, Settled, Settler};
use crate::transport::{Link, LinkState, Outbound, Transport, WebSocketTransport};

/// Topic name carrying component-wide settings.
pub const CONFIG_TOPIC: &str = "__config__";

/// The live transport of the current connection.
struct ActiveLink {
    outbound: mpsc::Sender<Outbound>,
    state: watch::Receiver<LinkState>,
}

impl ActiveLink {
    fn state(&self) -> LinkState {
        *self.state.borrow()
    }
}

/// State shared between the component handle and its dispatcher task.
pub(crate) struct Shared {
    pub(crate) endpoint: Endpoint,
    pub(crate) secret: Option<String>,
    pub(crate) config: ClientConfig,
    transport: Arc<dyn Transport>,
    pub(crate) keystore: Arc<dyn KeyStore>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) pending: PendingRequests,
    link: RwLock<Option<ActiveLink>>,
    connect_lock: Mutex<()>,
    pub(crate) auth_state: RwLock<AuthState>,
}

impl Shared {
    fn link(&self) -> RwLockReadGuard<'_, Option<ActiveLink>> {
        self.link.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn link_mut(&self) -> RwLockWriteGuard<'_, Option<ActiveLink>> {
        self.link.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.link()
            .as_ref()
            .is_some_and(|link| link.state() == LinkState::Open)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.link()
            .as_ref()
            .map_or(true, |link| link.state() == LinkState::Closed)
    }

    /// Opens the transport and, for identified components, authenticates.
    ///
    /// Concurrent callers are serialized; a caller finding the link already
    /// open returns immediately.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_open() {
            return Ok(());
        }

        let url = self.endpoint.url();
        let connect_timeout = self.config.connect_timeout();
        let deadline = tokio::time::Instant::now() + connect_timeout;
        tracing::info!(%url, cid = ?self.endpoint.cid, "connecting");

        let Link {
            outbound,
            inbound,
            mut state,
        } = tokio::time::timeout_at(deadline, self.transport.open(&url))
            .await
            .map_err(|_| {
                RembusError::Connection(format!(
                    "{} not reachable within {:?}",
                    url, connect_timeout
                ))
            })??;

        let opened = match tokio::time::timeout_at(
            deadline,
            state.wait_for(|s| *s != LinkState::Connecting),
        )
        .await
        {
            Ok(Ok(s)) => *s == LinkState::Open,
            _ => false,
        };
        if !opened {
            let _ = outbound.try_send(Outbound::Close);
            return Err(RembusError::Connection(format!(
                "{} not open within {:?}",
                url, connect_timeout
            )));
        }

        dispatcher::spawn(Arc::downgrade(self), inbound);
        *self.link_mut() = Some(ActiveLink { outbound, state });
        self.set_auth_state(AuthState::Unauthenticated);

        if let Some(cid) = self.endpoint.cid.as_deref() {
            if let Err(e) = self.authenticate(cid).await {
                tracing::warn!(%cid, error = %e, "authentication failed, closing link");
                // Bounded by the connect deadline, auth state left as Failed
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                self.close_link(remaining).await;
                return Err(e);
            }
        }

        tracing::info!(%url, "connected");
        Ok(())
    }

    /// Requests an orderly close and waits up to `timeout` for it.
    ///
    /// Returns the final closed state; a close that does not complete in
    /// time yields `false`.
    pub(crate) async fn close(&self, timeout: Duration) -> bool {
        let closed = self.close_link(timeout).await;
        self.set_auth_state(AuthState::Unauthenticated);
        closed
    }

    /// Closes the current link, leaving the authentication state as is.
    async fn close_link(&self, timeout: Duration) -> bool {
        let link = self.link_mut().take();
        let Some(link) = link else {
            return true;
        };
        let ActiveLink {
            outbound,
            mut state,
        } = link;

        if *state.borrow() != LinkState::Closed {
            let _ = tokio::time::timeout(timeout, async {
                // The writer task may already be gone
                let _ = outbound.send(Outbound::Close).await;
                let _ = state.wait_for(|s| *s == LinkState::Closed).await;
            })
            .await;
        }

        let closed = *state.borrow() == LinkState::Closed;
        tracing::info!(closed, in_flight = self.pending.len(), "connection closed");
        closed
    }

    /// Writes a frame on the current link without connecting.
    pub(crate) async fn write(&self, frame: Frame) -> Result<()> {
        let outbound = self
            .link()
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or_else(|| RembusError::Connection("not connected".to_string()))?;

        let frame_type = frame.type_tag();
        let id = frame.id();
        let bytes = frame.encode()?;
        tracing::debug!(frame_type, ?id, len = bytes.len(), "sending frame");

        outbound
            .send(Outbound::Frame(bytes))
            .await
            .map_err(|_| RembusError::Connection("connection closed".to_string()))
    }

    /// Writes a frame, connecting first if the link is not open.
    pub(crate) async fn send(self: &Arc<Self>, frame: Frame) -> Result<()> {
        if !self.is_open() {
            self.connect().await?;
        }
        self.write(frame).await
    }

    /// Sends a request and waits for its RESPONSE, connecting if needed.
    pub(crate) async fn request(self: &Arc<Self>, frame: Frame, settler: Settler) -> Result<Settled> {
        if !self.is_open() {
            self.connect().await?;
        }
        self.exchange(frame, settler).await
    }

    /// Sends a request on the current link and waits for its RESPONSE.
    pub(crate) async fn exchange(&self, frame: Frame, settler: Settler) -> Result<Settled> {
        let id = frame.id().ok_or_else(|| {
            RembusError::Validation(format!("frame type {} expects no response", frame.type_tag()))
        })?;

        let waiter = self.pending.register(id, settler);
        if let Err(e) = self.write(frame).await {
            self.pending.cancel(&id);
            return Err(e);
        }
        self.pending.wait(waiter, self.config.request_timeout()).await
    }

    async fn setting(self: &Arc<Self>, name: &str, command: SettingCommand) -> Result<()> {
        let frame = Frame::Setting {
            id: MsgId::new(),
            name: name.to_string(),
            command,
        };
        self.request(frame, Settler::Default).await.map(|_| ())
    }

    pub(crate) fn set_auth_state(&self, state: AuthState) {
        *self.auth_state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn auth_state(&self) -> AuthState {
        *self.auth_state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A Rembus component.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Component {
    pub(crate) shared: Arc<Shared>,
}

impl Component {
    /// Creates a component from a broker URL (`ws://host:port/cid`) or a bare
    /// identity string, with default settings.
    ///
    /// No I/O happens until the first operation or [`connect`](Self::connect).
    pub fn new(url: &str) -> Result<Self> {
        Self::builder(url).build()
    }

    /// Creates a component that answers challenges with a shared secret.
    pub fn with_secret(url: &str, secret: impl Into<String>) -> Result<Self> {
        Self::builder(url).secret(secret).build()
    }

    /// Starts building a component with custom transport, key store or
    /// configuration.
    pub fn builder(url: &str) -> ComponentBuilder {
        ComponentBuilder::new(url)
    }

    /// The component identity, if any.
    pub fn cid(&self) -> Option<&str> {
        self.shared.endpoint.cid.as_deref()
    }

    /// Where the component connects.
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Opens the connection and authenticates identified components.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect().await
    }

    /// Closes the connection, waiting up to the configured close timeout.
    ///
    /// See [`close_with_timeout`](Self::close_with_timeout).
    pub async fn close(&self) -> Result<bool> {
        self.close_with_timeout(self.shared.config.close_timeout())
            .await
    }

    /// Closes the connection, waiting up to `timeout` for the transport to
    /// report closed.
    ///
    /// Idempotent: without a connection this returns `Ok(true)`. A close that
    /// does not complete in time returns `Ok(false)`.
    pub async fn close_with_timeout(&self, timeout: Duration) -> Result<bool> {
        Ok(self.shared.close(timeout).await)
    }

    /// Returns true if the transport is open.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Returns true if there is no transport or it reports closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Authentication outcome of the current connection.
    pub fn auth_state(&self) -> AuthState {
        self.shared.auth_state()
    }

    /// Returns true if the broker accepted this component's identity.
    pub fn is_authenticated(&self) -> bool {
        self.auth_state().is_authenticated()
    }

    /// Writes a raw frame, connecting first if needed.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.shared.send(frame).await
    }

    /// Calls `method` on whichever component exposes it.
    pub async fn rpc(&self, method: &str, args: Vec<Arg>) -> Result<Arg> {
        self.call(method, None, args).await
    }

    /// Calls `method` on the component `target`.
    pub async fn direct(&self, target: &str, method: &str, args: Vec<Arg>) -> Result<Arg> {
        self.call(method, Some(target.to_string()), args).await
    }

    async fn call(&self, method: &str, target: Option<String>, args: Vec<Arg>) -> Result<Arg> {
        let frame = Frame::Rpc {
            id: MsgId::new(),
            method: method.to_string(),
            target,
            args: table2tag(args)?,
        };
        let settled = self.shared.request(frame, Settler::Default).await?;
        Ok(settled.into_payload())
    }

    /// Publishes `args` on `topic`. No acknowledgment is awaited.
    pub async fn publish(&self, topic: &str, args: Vec<Arg>) -> Result<()> {
        let frame = Frame::PubSub {
            topic: topic.to_string(),
            args: table2tag(args)?,
        };
        self.shared.send(frame).await
    }

    /// Subscribes `f` to `topic`.
    ///
    /// The handler is installed only after the broker acknowledges. Returns
    /// the installed handler, which can later be passed to
    /// [`unsubscribe`](Self::unsubscribe).
    pub async fn subscribe<F, Fut>(&self, topic: &str, f: F) -> Result<Arc<dyn Handler>>
    where
        F: Fn(Option<SharedContext>, Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arg>> + Send + 'static,
    {
        let handler = handler_fn(f);
        self.subscribe_handler(topic, Arc::clone(&handler)).await?;
        Ok(handler)
    }

    /// Subscribes an existing handler to `topic`.
    pub async fn subscribe_handler(&self, topic: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.activate(topic, SettingKind::Subscribe, handler).await
    }

    /// Exposes `f` as the RPC method `method`.
    pub async fn expose<F, Fut>(&self, method: &str, f: F) -> Result<Arc<dyn Handler>>
    where
        F: Fn(Option<SharedContext>, Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arg>> + Send + 'static,
    {
        let handler = handler_fn(f);
        self.expose_handler(method, Arc::clone(&handler)).await?;
        Ok(handler)
    }

    /// Exposes an existing handler as the RPC method `method`.
    pub async fn expose_handler(&self, method: &str, handler: Arc<dyn Handler>) -> Result<()> {
        self.activate(method, SettingKind::Expose, handler).await
    }

    async fn activate(&self, name: &str, cmd: SettingKind, handler: Arc<dyn Handler>) -> Result<()> {
        self.shared.setting(name, SettingCommand::new(cmd)).await?;
        self.shared.handlers.insert(name, handler);
        tracing::debug!(name, cmd = cmd.as_str(), "handler installed");
        Ok(())
    }

    /// Stops delivery of `topic`, given by name or by its handler.
    pub async fn unsubscribe(&self, topic: impl Into<TopicRef>) -> Result<()> {
        self.deactivate(topic.into(), SettingKind::Unsubscribe).await
    }

    /// Withdraws an exposed method, given by name or by its handler.
    pub async fn unexpose(&self, method: impl Into<TopicRef>) -> Result<()> {
        self.deactivate(method.into(), SettingKind::Unexpose).await
    }

    async fn deactivate(&self, topic: TopicRef, cmd: SettingKind) -> Result<()> {
        let name = self.shared.handlers.resolve(&topic).ok_or_else(|| {
            RembusError::Validation("handler is not registered on this component".to_string())
        })?;
        self.shared.setting(&name, SettingCommand::new(cmd)).await?;
        self.shared.handlers.remove(&name);
        tracing::debug!(name, cmd = cmd.as_str(), "handler removed");
        Ok(())
    }

    /// Asks the broker to queue pub/sub messages for this component while it
    /// is disconnected.
    pub async fn reactive(&self) -> Result<()> {
        self.set_reactive(true).await
    }

    /// Turns broker-side queuing off.
    pub async fn unreactive(&self) -> Result<()> {
        self.set_reactive(false).await
    }

    async fn set_reactive(&self, status: bool) -> Result<()> {
        self.shared
            .setting(
                CONFIG_TOPIC,
                SettingCommand::with_status(SettingKind::Reactive, status),
            )
            .await
    }

    /// Installs the context passed as first argument to every handler.
    pub fn inject<T: Any + Send + Sync>(&self, ctx: T) {
        self.shared.handlers.set_context(Arc::new(ctx));
    }

    /// Names of the locally installed handlers.
    pub fn handler_names(&self) -> Vec<String> {
        self.shared.handlers.names()
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("endpoint", &self.shared.endpoint)
            .field("secret", &self.shared.secret.as_ref().map(|_| "[REDACTED]"))
            .field("open", &self.is_open())
            .finish()
    }
}

/// Builder for [`Component`].
pub struct ComponentBuilder {
    url: String,
    secret: Option<String>,
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn Transport>>,
    keystore: Option<Arc<dyn KeyStore>>,
}

impl ComponentBuilder {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            secret: None,
            config: None,
            transport: None,
            keystore: None,
        }
    }

    /// Answer challenges with a shared secret instead of a registered key.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom transport instead of WebSocket.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom key store instead of the one selected by the config.
    pub fn keystore(mut self, keystore: Arc<dyn KeyStore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    /// Validates the URL and configuration and builds the component.
    pub fn build(self) -> Result<Component> {
        let endpoint = Endpoint::parse(&self.url)?;
        let config = self.config.unwrap_or_default();
        config
            .validate()
            .map_err(|e| RembusError::Validation(e.to_string()))?;
        let keystore = self
            .keystore
            .unwrap_or_else(|| keystore::from_config(&config));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new()));

        Ok(Component {
            shared: Arc::new(Shared {
                endpoint,
                secret: self.secret,
                config,
                transport,
                keystore,
                handlers: HandlerRegistry::new(),
                pending: PendingRequests::new(),
                link: RwLock::new(None),
                connect_lock: Mutex::new(()),
                auth_state: RwLock::new(AuthState::Unauthenticated),
            }),
        })
    }
}
