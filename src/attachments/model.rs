//! Transfer requests coming in from collectors and attachment sets going out to the runner.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::events::DataCollectionContext;
use crate::sink::CollectorIdentity;

/// One transferred file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriAttachment {
    /// Local path of the file in the session output directory.
    pub path: PathBuf,
    /// Human-readable description supplied by the collector.
    pub description: String,
}

/// Attachments produced by one collector, grouped by collector uri.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSet {
    /// Collector uri (grouping key).
    pub uri: Arc<str>,
    /// Collector display name.
    pub display_name: Arc<str>,
    /// Attachments in completion-drain order.
    pub attachments: Vec<UriAttachment>,
}

impl AttachmentSet {
    /// Empty set for the given collector.
    pub fn new(collector: &CollectorIdentity) -> Self {
        Self {
            uri: Arc::clone(&collector.uri),
            display_name: Arc::clone(&collector.friendly_name),
            attachments: Vec::new(),
        }
    }
}

/// Outcome handed to [`FileTransferInformation::on_complete`].
#[derive(Debug, Clone)]
pub struct TransferCompleted {
    /// Correlation token passed in by the collector.
    pub token: Option<String>,
    /// Source file as requested.
    pub source: PathBuf,
    /// Where the file was (or would have been) written.
    pub destination: PathBuf,
    /// `None` on success.
    pub error: Option<TransferError>,
}

/// Callback invoked by the transfer worker once a request finishes.
pub type TransferCallback = Arc<dyn Fn(&TransferCompleted) + Send + Sync>;

/// A collector's request to send a file back to the runner.
///
/// ```rust
/// use datacollector::attachments::FileTransferInformation;
/// use datacollector::events::{DataCollectionContext, SessionId};
/// use datacollector::sink::CollectorIdentity;
///
/// let info = FileTransferInformation::new(
///     DataCollectionContext::session(SessionId::new()),
///     "/tmp/Sequence.xml",
///     CollectorIdentity::new("datacollector://microsoft/blame", "Blame"),
/// )
/// .with_description("test sequence")
/// .delete_source(true);
/// assert!(info.delete_source);
/// ```
#[derive(Clone)]
pub struct FileTransferInformation {
    /// Context the file belongs to; decides the destination subfolder.
    pub context: DataCollectionContext,
    /// Source file.
    pub path: PathBuf,
    /// Move instead of copy.
    pub delete_source: bool,
    /// Description attached to the resulting [`UriAttachment`].
    pub description: String,
    /// Opaque correlation token echoed back in [`TransferCompleted`].
    pub token: Option<String>,
    /// Collector that produced the file.
    pub collector: CollectorIdentity,
    /// Optional completion callback.
    pub on_complete: Option<TransferCallback>,
}

impl FileTransferInformation {
    /// Copy request with an empty description.
    pub fn new(
        context: DataCollectionContext,
        path: impl Into<PathBuf>,
        collector: CollectorIdentity,
    ) -> Self {
        Self {
            context,
            path: path.into(),
            delete_source: false,
            description: String::new(),
            token: None,
            collector,
            on_complete: None,
        }
    }

    /// Sets whether the source is moved (`true`) or copied.
    pub fn delete_source(mut self, delete: bool) -> Self {
        self.delete_source = delete;
        self
    }

    /// Sets the attachment description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the correlation token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Registers a completion callback.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransferCompleted) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for FileTransferInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTransferInformation")
            .field("context", &self.context)
            .field("path", &self.path)
            .field("delete_source", &self.delete_source)
            .field("description", &self.description)
            .field("token", &self.token)
            .field("collector", &self.collector)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}
