//! # Collector plugin surface.
//!
//! A [`DataCollector`] is produced by a [`CollectorLoader`] and receives a
//! [`CollectorInit`] bundle: its own event registry to subscribe handlers to,
//! a [`DataCollectionSink`] to send files, and a [`CollectorLogger`] for
//! diagnostics.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use datacollector::dispatch::{HandlerFn, HandlerIdentity};
//! use datacollector::events::{CollectionEvent, EventKind};
//! use datacollector::host::{CollectorInit, DataCollector};
//!
//! struct Marker;
//!
//! #[async_trait::async_trait]
//! impl DataCollector for Marker {
//!     async fn initialize(&self, init: CollectorInit) -> anyhow::Result<()> {
//!         let logger = init.logger.clone();
//!         init.events.subscribe(
//!             EventKind::SessionStart,
//!             HandlerFn::arc(HandlerIdentity::new("Marker", "on_session_start"), move |ev: CollectionEvent| {
//!                 let logger = logger.clone();
//!                 async move {
//!                     logger.info(&ev.context, "session started");
//!                     Ok(())
//!                 }
//!             }),
//!         );
//!         Ok(())
//!     }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::attachments::{AttachmentManager, FileTransferInformation};
use crate::dispatch::CollectorEvents;
use crate::events::DataCollectionContext;
use crate::sink::{CollectorIdentity, CollectorMessage, MessageLevel, MessageSink};

use super::settings::CollectorSettings;

/// Everything a collector gets at initialization.
#[derive(Clone)]
pub struct CollectorInit {
    /// Identity of this collector instance.
    pub identity: CollectorIdentity,
    /// Collector-specific configuration from the run settings.
    pub configuration: serde_json::Value,
    /// Registry the collector subscribes its handlers to.
    pub events: Arc<CollectorEvents>,
    /// File sending.
    pub sink: DataCollectionSink,
    /// Diagnostics.
    pub logger: CollectorLogger,
    /// Results directory hint from the run settings.
    pub results_directory: Option<PathBuf>,
}

/// A loaded data collector.
#[async_trait]
pub trait DataCollector: Send + Sync + 'static {
    /// Subscribes handlers and reads configuration.
    async fn initialize(&self, init: CollectorInit) -> anyhow::Result<()>;

    /// Environment variables the test host process should receive.
    fn environment_variables(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Called once when the host shuts down.
    async fn dispose(&self) {}
}

/// Creates collectors from their settings (plugin discovery lives behind this).
pub trait CollectorLoader: Send + Sync + 'static {
    /// Instantiates the collector described by `settings`.
    fn load(&self, settings: &CollectorSettings) -> anyhow::Result<Arc<dyn DataCollector>>;
}

/// File-sending handle bound to one collector.
#[derive(Clone)]
pub struct DataCollectionSink {
    attachments: Arc<AttachmentManager>,
    collector: CollectorIdentity,
}

impl DataCollectionSink {
    pub(crate) fn new(attachments: Arc<AttachmentManager>, collector: CollectorIdentity) -> Self {
        Self {
            attachments,
            collector,
        }
    }

    /// Queues a transfer. The collector identity is always this sink's.
    ///
    /// Returns `false` if the transfer was refused up front; transfer
    /// failures are reported when attachments are collected.
    pub async fn send_file(&self, mut info: FileTransferInformation) -> bool {
        info.collector = self.collector.clone();
        self.attachments.add_attachment(info).await
    }

    /// Shorthand for [`send_file`](Self::send_file) without a callback or token.
    pub async fn send_path(
        &self,
        context: DataCollectionContext,
        path: impl AsRef<Path>,
        description: impl Into<String>,
        delete_source: bool,
    ) -> bool {
        let info = FileTransferInformation::new(context, path.as_ref(), self.collector.clone())
            .with_description(description)
            .delete_source(delete_source);
        self.attachments.add_attachment(info).await
    }
}

/// Collector-scoped diagnostics routed to the message sink.
#[derive(Clone)]
pub struct CollectorLogger {
    sink: Arc<dyn MessageSink>,
    collector: CollectorIdentity,
}

impl CollectorLogger {
    pub(crate) fn new(sink: Arc<dyn MessageSink>, collector: CollectorIdentity) -> Self {
        Self { sink, collector }
    }

    /// Sends `text` at `level`, tagged with this collector and the context's test case.
    pub fn log(&self, level: MessageLevel, context: &DataCollectionContext, text: impl Into<Arc<str>>) {
        self.sink.send_message(
            CollectorMessage::new(level, text)
                .with_collector(self.collector.clone())
                .with_test_case(context.test_case_id),
        );
    }

    /// Informational message.
    pub fn info(&self, context: &DataCollectionContext, text: impl Into<Arc<str>>) {
        self.log(MessageLevel::Informational, context, text);
    }

    /// Warning.
    pub fn warn(&self, context: &DataCollectionContext, text: impl Into<Arc<str>>) {
        self.log(MessageLevel::Warning, context, text);
    }

    /// Error.
    pub fn error(&self, context: &DataCollectionContext, text: impl Into<Arc<str>>) {
        self.log(MessageLevel::Error, context, text);
    }
}
