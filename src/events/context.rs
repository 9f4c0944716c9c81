//! # Logical context of a collection event.
//!
//! A [`DataCollectionContext`] identifies the session an event belongs to and,
//! for test-case scoped events, the test case and its execution id. It is the
//! key the attachment manager groups pending transfers by.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one execution of a test case (a test can run several times per session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestExecId(pub Uuid);

impl TestExecId {
    /// Creates a fresh random execution id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TestExecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TestExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Session and (optionally) test case an event or transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataCollectionContext {
    /// Session the context belongs to.
    pub session_id: SessionId,
    /// Test case id, set only for test-case scoped contexts.
    pub test_case_id: Option<Uuid>,
    /// Execution id of the test case, set only for test-case scoped contexts.
    pub test_exec_id: Option<TestExecId>,
}

impl DataCollectionContext {
    /// Creates a session-scoped context.
    pub fn session(session_id: SessionId) -> Self {
        Self {
            session_id,
            test_case_id: None,
            test_exec_id: None,
        }
    }

    /// Creates a test-case scoped context within the given session.
    pub fn test_case(session_id: SessionId, test_case_id: Uuid, test_exec_id: TestExecId) -> Self {
        Self {
            session_id,
            test_case_id: Some(test_case_id),
            test_exec_id: Some(test_exec_id),
        }
    }

    /// Returns `true` if this context is scoped to a test case.
    #[inline]
    pub fn has_test_case(&self) -> bool {
        self.test_case_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_context_has_no_test_case() {
        let ctx = DataCollectionContext::session(SessionId::new());
        assert!(!ctx.has_test_case());
        assert!(ctx.test_exec_id.is_none());
    }

    #[test]
    fn test_case_contexts_differ_by_execution() {
        let session = SessionId::new();
        let test = Uuid::new_v4();
        let first = DataCollectionContext::test_case(session, test, TestExecId::new());
        let second = DataCollectionContext::test_case(session, test, TestExecId::new());
        assert!(first.has_test_case());
        assert_ne!(first, second);
    }
}
