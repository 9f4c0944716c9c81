//! # Message sink trait and message types.
//!
//! Provides [`MessageSink`] the extension point the host process implements to
//! route diagnostics back to the test runner.
//!
//! ## Rules
//! - `send_message` is synchronous and must not block for long; it is called
//!   from transfer workers, handler work items, and the host manager.
//! - Messages carry the originating collector when one is attributable;
//!   configuration problems found before any collector is loaded carry none.
//!
//! ## Example
//! ```rust
//! use std::sync::Mutex;
//! use datacollector::sink::{CollectorMessage, MessageLevel, MessageSink};
//!
//! #[derive(Default)]
//! struct Buffer(Mutex<Vec<String>>);
//!
//! impl MessageSink for Buffer {
//!     fn send_message(&self, message: CollectorMessage) {
//!         self.0.lock().unwrap().push(message.text.to_string());
//!     }
//! }
//!
//! let sink = Buffer::default();
//! sink.send_message(CollectorMessage::new(MessageLevel::Warning, "duplicate collector"));
//! assert_eq!(sink.0.lock().unwrap().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a [`CollectorMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    /// Informational text.
    Informational,
    /// Something went wrong but the run continues normally.
    Warning,
    /// A transfer or handler failed.
    Error,
}

/// Identity of a loaded collector: its uri and display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectorIdentity {
    /// Identifying uri, e.g. `datacollector://microsoft/CodeCoverage/2.0`.
    pub uri: Arc<str>,
    /// Human friendly name.
    pub friendly_name: Arc<str>,
}

impl CollectorIdentity {
    /// Creates a collector identity.
    pub fn new(uri: impl Into<Arc<str>>, friendly_name: impl Into<Arc<str>>) -> Self {
        Self {
            uri: uri.into(),
            friendly_name: friendly_name.into(),
        }
    }
}

impl fmt::Display for CollectorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.friendly_name, self.uri)
    }
}

/// One diagnostic message routed to the test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorMessage {
    /// Severity.
    pub level: MessageLevel,
    /// Message text.
    pub text: Arc<str>,
    /// Originating collector, when attributable.
    pub collector: Option<CollectorIdentity>,
    /// Active test case, when known.
    pub test_case_id: Option<Uuid>,
}

impl CollectorMessage {
    /// Creates a message with no collector or test case attached.
    pub fn new(level: MessageLevel, text: impl Into<Arc<str>>) -> Self {
        Self {
            level,
            text: text.into(),
            collector: None,
            test_case_id: None,
        }
    }

    /// Attaches the originating collector.
    #[inline]
    pub fn with_collector(mut self, collector: CollectorIdentity) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Attaches the active test case id, if any.
    #[inline]
    pub fn with_test_case(mut self, test_case_id: Option<Uuid>) -> Self {
        self.test_case_id = test_case_id;
        self
    }
}

/// Destination for collector and platform diagnostics.
///
/// ### Implementation requirements
/// - Must be cheap: never perform blocking network I/O inline.
/// - Must not panic; callers do not guard against sink panics.
pub trait MessageSink: Send + Sync + 'static {
    /// Delivers one message.
    fn send_message(&self, message: CollectorMessage);
}

impl<S: MessageSink + ?Sized> MessageSink for Arc<S> {
    fn send_message(&self, message: CollectorMessage) {
        (**self).send_message(message);
    }
}
