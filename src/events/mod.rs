//! Collection events: lifecycle payloads and their logical context.
//!
//! This module groups the event **data model** routed by the
//! [`EventDispatcher`](crate::dispatch::EventDispatcher) to collector handlers.
//!
//! ## Contents
//! - [`CollectionEvent`], [`EventPayload`], [`EventKind`] the sealed set of lifecycle events
//! - [`DataCollectionContext`] session / test case scope of an event or transfer
//!
//! ## Quick reference
//! - **Producers**: [`CollectorHostManager`](crate::CollectorHostManager) (one event per
//!   lifecycle notification from the runner).
//! - **Consumers**: collector handlers registered in
//!   [`CollectorEvents`](crate::dispatch::CollectorEvents).

mod context;
mod event;

pub use context::{DataCollectionContext, SessionId, TestExecId};
pub use event::{CollectionEvent, EventKind, EventPayload, TestCaseInfo, TestOutcome};
