//! Event multicast dispatch: collector handler registry and timed fan-out.
//!
//! ## Contents
//! - [`EventHandler`], [`HandlerFn`], [`HandlerIdentity`] one subscribed collector callback
//! - [`CollectorEvents`] ordered handler lists, one slot per [`EventKind`](crate::events::EventKind)
//! - [`EventDispatcher`] concurrent invocation with one shared timeout
//!
//! ## Flow
//! ```text
//! CollectionEvent ──► EventDispatcher::raise(&events, &event)
//!                        │ kind() → slot lookup (missing slot = fatal)
//!                        ├─► spawn handler #1 ─┐
//!                        ├─► spawn handler #2 ─┼─► ErrorLog (frozen on timeout)
//!                        └─► spawn handler #N ─┘
//!                        ▼
//!               Vec<InvocationError>
//! ```

mod dispatcher;
mod handler;
mod registry;

pub use dispatcher::EventDispatcher;
pub use handler::{EventHandler, HandlerFn, HandlerIdentity};
pub use registry::{CollectorEvents, SubscriptionId};
