//! # datacollector
//!
//! **datacollector** is the core of an out-of-process data collector host for
//! a test platform. It loads pluggable diagnostic collectors, routes test
//! lifecycle events to them, and moves the files they produce into a session
//! output directory in the background.
//!
//! Collectors are third-party code. Every call into them is isolated: errors
//! and panics are recorded per handler, and a slow handler is bounded by one
//! shared fan-out timeout.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        runner (external)
//!                              │ lifecycle notifications
//!                              ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │  CollectorHostManager                                          │
//! │  - loaded collectors (snapshot per event)                      │
//! │  - EventDispatcher (shared timeout)                            │
//! │  - AttachmentManager (session output directory)                │
//! └──────┬──────────────────────────────┬──────────────────────────┘
//!        │ raise(events, ev)            │ collect_attachments(ctx)
//!        ▼                              ▼
//! ┌───────────────────────┐     ┌───────────────────────────────┐
//! │ CollectorEvents (C1)  │     │ pending requests by context   │
//! │  ├─► handler task #1  │     │   └─► AttachmentRequest.wait  │
//! │  └─► handler task #2  │     └───────────────▲───────────────┘
//! └──────────┬────────────┘                     │ complete
//!            │ DataCollectionSink::send_file    │
//!            ▼                                  │
//!    AttachmentManager::add_attachment ──► JobQueue<TransferJob>
//!                                          └─► FileTransferHandler (copy / move)
//! ```
//!
//! ### Session lifecycle
//! ```text
//! initialize_data_collectors(settings) ──► env vars for the test host
//! session_started(ctx)                 ──► output dir + SessionStart fan-out
//! test_case_started / test_case_ended  ──► fan-out, attachments of that test case
//! session_ended(ctx, cancelled)        ──► SessionEnd fan-out, session attachments
//! dispose()                            ──► unsubscribe, dispose collectors, abort transfers
//! ```
//!
//! ## Features
//! | Area            | Description                                                   | Key types                                    |
//! |-----------------|---------------------------------------------------------------|----------------------------------------------|
//! | **Hosting**     | Load collectors, translate lifecycle calls, collect results.  | [`CollectorHostManager`], [`DataCollector`]  |
//! | **Dispatch**    | Concurrent handler fan-out with one shared timeout.           | [`EventDispatcher`], [`CollectorEvents`]     |
//! | **Attachments** | Background copy/move, grouping by collector uri.              | [`AttachmentManager`], [`AttachmentSet`]     |
//! | **Queue**       | Bounded, priority-aware job queue with one worker.            | [`JobQueue`], [`JobHandler`]                 |
//! | **Diagnostics** | User-visible messages and `tracing` setup.                    | [`MessageSink`], [`telemetry::init_logging`] |
//! | **Errors**      | Typed errors with stable labels.                              | [`TransferError`], [`InvocationError`]       |
//! | **Config**      | Timeouts, results folder, queue limits; env overrides.        | [`Config`]                                   |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use datacollector::{CollectorHostManager, CollectorLoader, Config, DataCollector, RunSettings, TracingSink};
//! use datacollector::events::{DataCollectionContext, SessionId};
//! use datacollector::host::CollectorSettings;
//!
//! struct NoCollectors;
//!
//! impl CollectorLoader for NoCollectors {
//!     fn load(&self, settings: &CollectorSettings) -> anyhow::Result<Arc<dyn DataCollector>> {
//!         anyhow::bail!("unknown collector {}", settings.type_name)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let host = CollectorHostManager::new(&Config::default(), Arc::new(NoCollectors), Arc::new(TracingSink::new()));
//!     let env = host.initialize_data_collectors(&RunSettings::default()).await;
//!     assert!(env.is_empty());
//!
//!     let ctx = DataCollectionContext::session(SessionId::new());
//!     let listens_to_tests = host.session_started(ctx).await;
//!     assert!(!listens_to_tests);
//!     assert!(host.session_ended(ctx, false).await.is_empty());
//!     host.dispose().await;
//! }
//! ```
mod config;
mod error;

pub mod attachments;
pub mod dispatch;
pub mod events;
pub mod host;
pub mod queue;
pub mod sink;
pub mod telemetry;

// ---- Public re-exports ----

pub use attachments::{AttachmentManager, AttachmentSet, FileTransferInformation, UriAttachment};
pub use config::{Config, DEFAULT_EVENT_TIMEOUT, DEFAULT_RESULTS_FOLDER};
pub use dispatch::{CollectorEvents, EventDispatcher, EventHandler, HandlerFn, HandlerIdentity};
pub use error::{
    DispatchError, HostError, InvocationError, InvocationFailure, QueueError, TransferError,
};
pub use events::{CollectionEvent, DataCollectionContext, EventKind};
pub use host::{CollectorHostManager, CollectorLoader, DataCollector, RunSettings};
pub use queue::{JobFn, JobHandler, JobQueue, JobQueueOptions};
pub use sink::{CollectorMessage, MessageLevel, MessageSink, TracingSink};
