//! # Collector event handlers.
//!
//! An [`EventHandler`] is one collector callback subscribed to one event kind.
//! Handlers are third-party code: they may fail, panic or hang, and the
//! [`EventDispatcher`](super::EventDispatcher) isolates each invocation.
//!
//! [`HandlerFn`] adapts an async closure, so simple collectors do not need a
//! dedicated type:
//!
//! ```rust
//! use datacollector::dispatch::{HandlerFn, HandlerIdentity};
//! use datacollector::events::CollectionEvent;
//!
//! let handler = HandlerFn::arc(HandlerIdentity::new("Blame", "on_session_start"), |ev: CollectionEvent| async move {
//!     let _ = ev.context.session_id;
//!     Ok(())
//! });
//! # let _ = handler;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::events::CollectionEvent;

/// Diagnostic identity of a handler: the owning type and the method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerIdentity {
    /// Type (or collector) the handler belongs to.
    pub target: Arc<str>,
    /// Method or callback name.
    pub method: Arc<str>,
}

impl HandlerIdentity {
    /// Creates an identity from its parts.
    pub fn new(target: impl Into<Arc<str>>, method: impl Into<Arc<str>>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for HandlerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.target, self.method)
    }
}

/// One collector callback for a lifecycle event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles a single event.
    ///
    /// Returned errors are recorded per handler; the root cause is what gets reported.
    async fn handle(&self, event: &CollectionEvent) -> anyhow::Result<()>;

    /// Identity used in invocation errors and timeout diagnostics.
    fn identity(&self) -> HandlerIdentity;
}

/// Closure-backed [`EventHandler`].
///
/// The closure receives its own copy of the event.
pub struct HandlerFn<F> {
    identity: HandlerIdentity,
    f: F,
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(CollectionEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Creates a handler.
    pub fn new(identity: HandlerIdentity, f: F) -> Self {
        Self { identity, f }
    }

    /// Creates the handler and returns it as a shared trait object.
    pub fn arc(identity: HandlerIdentity, f: F) -> Arc<dyn EventHandler> {
        Arc::new(Self::new(identity, f))
    }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(CollectionEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &CollectionEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }

    fn identity(&self) -> HandlerIdentity {
        self.identity.clone()
    }
}
