//! # Rembus client
//!
//! A component holds one duplex connection to a Rembus broker and
//! multiplexes over it:
//!
//! - **RPC**: [`Component::rpc`] / [`Component::direct`] and [`Component::expose`]
//! - **Pub/sub**: [`Component::publish`], [`Component::subscribe`], reactive mode
//! - **Identity**: challenge-response authentication on connect, and
//!   [`Component::register`] / [`Component::unregister`] for provisioning
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌─────────────┐  bytes  ┌───────────┐
//! │  Component   │ ────────► │  Transport  │ ──────► │  Broker   │
//! │  (API calls) │           │  (ws / mem) │ ◄────── │           │
//! └──────┬───────┘           └──────┬──────┘         └───────────┘
//!        │ pending requests         │ inbound
//!        ▼                          ▼
//! ┌──────────────┐  RESPONSE ┌─────────────┐ PUBSUB/RPC ┌──────────┐
//! │   Pending    │ ◄──────── │ Dispatcher  │ ─────────► │ Handlers │
//! └──────────────┘           └─────────────┘            └──────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use rembus::{Arg, Component};
//!
//! # async fn run() -> rembus::Result<()> {
//! let component = Component::new("ws://localhost:8000/mycomponent")?;
//! let sum = component.rpc("add", vec![Arg::from(1), Arg::from(2)]).await?;
//! println!("{:?}", sum);
//!
//! component
//!     .subscribe("mytopic", |_ctx, args| async move {
//!         println!("received {:?}", args);
//!         Ok(Arg::null())
//!     })
//!     .await?;
//! component.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod component;
pub mod config;
mod dispatcher;
pub mod endpoint;
pub mod handlers;
pub mod keystore;
mod pending;
mod register;
pub mod transport;

pub use auth::AuthState;
pub use component::{Component, ComponentBuilder, CONFIG_TOPIC};
pub use config::{ClientConfig, ConfigError, KeyStoreKind};
pub use endpoint::{Endpoint, Scheme};
pub use handlers::{handler_fn, Handler, HandlerFuture, SharedContext, TopicRef};
pub use keystore::{FileKeyStore, KeyStore, KeyringKeyStore, MemoryKeyStore};
pub use transport::{
    Link, LinkState, MemoryPeer, MemoryTransport, Outbound, PeerSender, Transport,
    WebSocketTransport,
};

pub use protocol::{
    Arg, Frame, MsgId, RembusError, Result, SettingCommand, SettingKind, Status, Table, Value,
};
