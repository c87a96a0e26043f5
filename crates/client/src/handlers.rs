//! Local callbacks for subscribed topics and exposed methods.
//!
//! Every handler has the same calling convention: the optional shared
//! context installed with `inject`, then the ordered, table-rehydrated
//! arguments. It returns a result value or an error.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use protocol::Arg;

/// Context object shared with every handler of a component.
pub type SharedContext = Arc<dyn Any + Send + Sync>;

/// Future returned by a handler invocation.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Arg>>;

/// A topic or method callback.
pub trait Handler: Send + Sync {
    /// Invokes the callback with the injected context and decoded arguments.
    fn call(&self, ctx: Option<SharedContext>, args: Vec<Arg>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Option<SharedContext>, Vec<Arg>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Arg>> + Send + 'static,
{
    fn call(&self, ctx: Option<SharedContext>, args: Vec<Arg>) -> HandlerFuture {
        Box::pin(self(ctx, args))
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Option<SharedContext>, Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Arg>> + Send + 'static,
{
    Arc::new(f)
}

/// Names a registered topic either directly or by its handler.
#[derive(Clone)]
pub enum TopicRef {
    /// The topic or method name.
    Name(String),
    /// A handler previously installed by subscribe or expose.
    Handler(Arc<dyn Handler>),
}

impl From<&str> for TopicRef {
    fn from(name: &str) -> Self {
        TopicRef::Name(name.to_string())
    }
}

impl From<String> for TopicRef {
    fn from(name: String) -> Self {
        TopicRef::Name(name)
    }
}

impl From<Arc<dyn Handler>> for TopicRef {
    fn from(handler: Arc<dyn Handler>) -> Self {
        TopicRef::Handler(handler)
    }
}

impl From<&Arc<dyn Handler>> for TopicRef {
    fn from(handler: &Arc<dyn Handler>) -> Self {
        TopicRef::Handler(Arc::clone(handler))
    }
}

impl std::fmt::Debug for TopicRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopicRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            TopicRef::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Name → handler table. At most one handler per name.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn Handler>>,
    context: RwLock<Option<SharedContext>>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` under `name`, replacing any previous one.
    pub(crate) fn insert(&self, name: &str, handler: Arc<dyn Handler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.remove(name).map(|(_, h)| h)
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).map(|h| Arc::clone(h.value()))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Resolves a topic reference to a name.
    ///
    /// A handler reference resolves only if that exact handler is registered.
    pub(crate) fn resolve(&self, topic: &TopicRef) -> Option<String> {
        match topic {
            TopicRef::Name(name) => Some(name.clone()),
            TopicRef::Handler(handler) => self
                .handlers
                .iter()
                .find(|entry| Arc::ptr_eq(entry.value(), handler))
                .map(|entry| entry.key().clone()),
        }
    }

    /// Registered names, sorted.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub(crate) fn set_context(&self, ctx: SharedContext) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(ctx);
    }

    pub(crate) fn context(&self) -> Option<SharedContext> {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
