//! # Lifecycle events delivered to data collectors.
//!
//! The [`EventKind`] enum classifies events across four groups:
//! - **Session events**: start, end, pause, resume
//! - **Test case events**: start, end, pause, resume, reset, failed
//! - **Test step events**: start, end
//! - **Requests**: data request and custom notifications
//!
//! The [`CollectionEvent`] struct pairs a [`DataCollectionContext`] with the
//! variant-specific [`EventPayload`].
//!
//! ## Custom notifications
//! Any notification type name the host does not know about travels as
//! [`EventPayload::Custom`] and is dispatched to the single
//! [`EventKind::CustomNotification`] slot.
//!
//! ## Example
//! ```rust
//! use datacollector::events::{CollectionEvent, DataCollectionContext, EventKind, SessionId};
//!
//! let ctx = DataCollectionContext::session(SessionId::new());
//! let ev = CollectionEvent::session_start(ctx);
//!
//! assert_eq!(ev.kind(), EventKind::SessionStart);
//! assert_eq!(ev.kind().as_str(), "session_start");
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::DataCollectionContext;

/// Classification of collection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // === Session events ===
    /// Test session started.
    SessionStart,
    /// Test session ended.
    SessionEnd,
    /// Test session paused.
    SessionPause,
    /// Test session resumed.
    SessionResume,

    // === Test case events ===
    /// Test case is about to run.
    TestCaseStart,
    /// Test case finished (any outcome).
    TestCaseEnd,
    /// Test case paused.
    TestCasePause,
    /// Test case resumed.
    TestCaseResume,
    /// Test case reset.
    TestCaseReset,
    /// Test case reported a failure.
    TestCaseFailed,

    // === Test step events ===
    /// Test step started.
    TestStepStart,
    /// Test step ended.
    TestStepEnd,

    // === Requests ===
    /// Runner asked collectors to flush data.
    DataRequest,
    /// Any custom notification (all notification types share this slot).
    CustomNotification,
}

impl EventKind {
    /// Every known kind; the handler registry builds one slot per entry.
    pub const ALL: [EventKind; 14] = [
        EventKind::SessionStart,
        EventKind::SessionEnd,
        EventKind::SessionPause,
        EventKind::SessionResume,
        EventKind::TestCaseStart,
        EventKind::TestCaseEnd,
        EventKind::TestCasePause,
        EventKind::TestCaseResume,
        EventKind::TestCaseReset,
        EventKind::TestCaseFailed,
        EventKind::TestStepStart,
        EventKind::TestStepEnd,
        EventKind::DataRequest,
        EventKind::CustomNotification,
    ];

    /// Machine-friendly name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::SessionEnd => "session_end",
            EventKind::SessionPause => "session_pause",
            EventKind::SessionResume => "session_resume",
            EventKind::TestCaseStart => "test_case_start",
            EventKind::TestCaseEnd => "test_case_end",
            EventKind::TestCasePause => "test_case_pause",
            EventKind::TestCaseResume => "test_case_resume",
            EventKind::TestCaseReset => "test_case_reset",
            EventKind::TestCaseFailed => "test_case_failed",
            EventKind::TestStepStart => "test_step_start",
            EventKind::TestStepEnd => "test_step_end",
            EventKind::DataRequest => "data_request",
            EventKind::CustomNotification => "custom_notification",
        }
    }

    /// Returns `true` for kinds that make a collector "test-case scoped".
    #[inline]
    pub fn is_test_case_scoped(self) -> bool {
        matches!(
            self,
            EventKind::TestCaseStart | EventKind::TestCaseEnd | EventKind::TestCaseFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome reported with [`EventPayload::TestCaseEnd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// No outcome reported.
    None,
    /// Test passed.
    Passed,
    /// Test failed.
    Failed,
    /// Test was skipped.
    Skipped,
    /// Test could not be found.
    NotFound,
}

/// Test case identity carried by test-case scoped payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseInfo {
    /// Test case id.
    pub id: Uuid,
    /// Fully qualified test name.
    pub name: Arc<str>,
}

impl TestCaseInfo {
    /// Creates a test case description.
    pub fn new(id: Uuid, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Variant-specific part of a [`CollectionEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStart,
    SessionEnd,
    SessionPause,
    SessionResume,
    TestCaseStart { test: TestCaseInfo },
    TestCaseEnd { test: TestCaseInfo, outcome: TestOutcome },
    TestCasePause { test: TestCaseInfo },
    TestCaseResume { test: TestCaseInfo },
    TestCaseReset { test: TestCaseInfo },
    TestCaseFailed { test: TestCaseInfo, message: Arc<str> },
    TestStepStart { test: TestCaseInfo, step: Arc<str> },
    TestStepEnd { test: TestCaseInfo, step: Arc<str> },
    DataRequest { request_id: Uuid },
    Custom {
        /// Notification type name chosen by the sender.
        notification_type: Arc<str>,
        /// Opaque notification body.
        body: serde_json::Value,
    },
}

/// One lifecycle event routed to collector handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEvent {
    /// Session / test case scope of the event.
    pub context: DataCollectionContext,
    /// Variant-specific data.
    pub payload: EventPayload,
}

impl CollectionEvent {
    /// Creates an event from its parts.
    pub fn new(context: DataCollectionContext, payload: EventPayload) -> Self {
        Self { context, payload }
    }

    /// Shorthand for a session start event.
    pub fn session_start(context: DataCollectionContext) -> Self {
        Self::new(context, EventPayload::SessionStart)
    }

    /// Shorthand for a session end event.
    pub fn session_end(context: DataCollectionContext) -> Self {
        Self::new(context, EventPayload::SessionEnd)
    }

    /// Shorthand for a test case start event.
    pub fn test_case_start(context: DataCollectionContext, test: TestCaseInfo) -> Self {
        Self::new(context, EventPayload::TestCaseStart { test })
    }

    /// Shorthand for a test case end event.
    pub fn test_case_end(
        context: DataCollectionContext,
        test: TestCaseInfo,
        outcome: TestOutcome,
    ) -> Self {
        Self::new(context, EventPayload::TestCaseEnd { test, outcome })
    }

    /// Shorthand for a custom notification.
    pub fn custom(
        context: DataCollectionContext,
        notification_type: impl Into<Arc<str>>,
        body: serde_json::Value,
    ) -> Self {
        Self::new(
            context,
            EventPayload::Custom {
                notification_type: notification_type.into(),
                body,
            },
        )
    }

    /// Returns the dispatch slot of this event.
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::SessionStart => EventKind::SessionStart,
            EventPayload::SessionEnd => EventKind::SessionEnd,
            EventPayload::SessionPause => EventKind::SessionPause,
            EventPayload::SessionResume => EventKind::SessionResume,
            EventPayload::TestCaseStart { .. } => EventKind::TestCaseStart,
            EventPayload::TestCaseEnd { .. } => EventKind::TestCaseEnd,
            EventPayload::TestCasePause { .. } => EventKind::TestCasePause,
            EventPayload::TestCaseResume { .. } => EventKind::TestCaseResume,
            EventPayload::TestCaseReset { .. } => EventKind::TestCaseReset,
            EventPayload::TestCaseFailed { .. } => EventKind::TestCaseFailed,
            EventPayload::TestStepStart { .. } => EventKind::TestStepStart,
            EventPayload::TestStepEnd { .. } => EventKind::TestStepEnd,
            EventPayload::DataRequest { .. } => EventKind::DataRequest,
            EventPayload::Custom { .. } => EventKind::CustomNotification,
        }
    }

    /// Name of the payload type, used in timeout diagnostics.
    ///
    /// Custom notifications report their own notification type name.
    pub fn payload_type_name(&self) -> &str {
        match &self.payload {
            EventPayload::Custom {
                notification_type, ..
            } => notification_type,
            _ => self.kind().as_str(),
        }
    }

    /// Test case carried by the payload, if any.
    pub fn test_case(&self) -> Option<&TestCaseInfo> {
        match &self.payload {
            EventPayload::TestCaseStart { test }
            | EventPayload::TestCaseEnd { test, .. }
            | EventPayload::TestCasePause { test }
            | EventPayload::TestCaseResume { test }
            | EventPayload::TestCaseReset { test }
            | EventPayload::TestCaseFailed { test, .. }
            | EventPayload::TestStepStart { test, .. }
            | EventPayload::TestStepEnd { test, .. } => Some(test),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SessionId, TestExecId};

    #[test]
    fn all_kinds_are_distinct() {
        let mut names: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn custom_notifications_share_one_slot() {
        let ctx = DataCollectionContext::session(SessionId::new());
        let a = CollectionEvent::custom(ctx, "CodeCoverageFlush", serde_json::Value::Null);
        let b = CollectionEvent::custom(ctx, "BlameDump", serde_json::json!({"pid": 42}));
        assert_eq!(a.kind(), EventKind::CustomNotification);
        assert_eq!(b.kind(), EventKind::CustomNotification);
        assert_eq!(b.payload_type_name(), "BlameDump");
    }

    #[test]
    fn test_case_payloads_expose_test_info() {
        let test = TestCaseInfo::new(Uuid::new_v4(), "Suite.Passes");
        let ctx = DataCollectionContext::test_case(SessionId::new(), test.id, TestExecId::new());
        let ev = CollectionEvent::test_case_end(ctx, test.clone(), TestOutcome::Passed);
        assert_eq!(ev.kind(), EventKind::TestCaseEnd);
        assert!(ev.kind().is_test_case_scoped());
        assert_eq!(ev.test_case(), Some(&test));
        assert!(CollectionEvent::session_start(ctx).test_case().is_none());
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let ctx = DataCollectionContext::session(SessionId::new());
        let json = serde_json::to_value(CollectionEvent::session_end(ctx)).unwrap();
        assert_eq!(json["payload"]["type"], "session_end");
    }
}
