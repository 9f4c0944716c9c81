//! Error types used by the collector host, the job queue, and the event dispatcher.
//!
//! This module defines the error enums shared across the crate:
//!
//! - [`TransferError`]: a single attachment transfer failed or was rejected.
//! - [`QueueError`]: the job queue rejected, lost, or failed to run a job.
//! - [`InvocationError`]: one collector handler failed, panicked, or timed out.
//! - [`DispatchError`]: the dispatcher itself is inconsistent (a coding defect).
//! - [`HostError`]: configuration and collector loading failures.
//!
//! Each type provides `as_label` (stable snake_case label for logs/metrics) and
//! `as_message` (human-readable detail).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::dispatch::HandlerIdentity;
use crate::events::EventKind;

/// # Errors produced while transferring one attachment.
///
/// Captured on the [`AttachmentRequest`](crate::attachments::AttachmentRequest)
/// by the background worker and surfaced later through the message sink; never
/// propagated to the collector that requested the transfer.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// `add_attachment` was called before the manager was initialized.
    #[error("attachment manager is not initialized")]
    NotInitialized,

    /// The source file does not exist.
    #[error("file not found: {path}")]
    SourceNotFound {
        /// Offending source path.
        path: PathBuf,
    },

    /// The source path has no file name component.
    #[error("source path has no file name: {path}")]
    InvalidSource {
        /// Offending source path.
        path: PathBuf,
    },

    /// Any I/O failure while preparing the destination or moving bytes.
    #[error("{operation} failed for {path}: {reason}")]
    Io {
        /// Operation that failed (`create_dir`, `remove_stale`, `copy`, `move`).
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error rendered as text.
        reason: String,
    },

    /// The job queue refused the request.
    #[error("transfer was not queued: {reason}")]
    Rejected {
        /// Queue rejection reason.
        reason: String,
    },

    /// The worker went away without recording an outcome.
    #[error("transfer was abandoned before completion")]
    Abandoned,
}

impl TransferError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransferError::NotInitialized => "transfer_not_initialized",
            TransferError::SourceNotFound { .. } => "transfer_source_not_found",
            TransferError::InvalidSource { .. } => "transfer_invalid_source",
            TransferError::Io { .. } => "transfer_io",
            TransferError::Rejected { .. } => "transfer_rejected",
            TransferError::Abandoned => "transfer_abandoned",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Errors produced by the bounded job queue.
///
/// Every variant is reported through the queue's error callback; the queue
/// never drops a job without one of these reaching the callback.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is at capacity and configured to reject.
    #[error("queue '{queue}' is full ({jobs} jobs, {bytes} bytes); job rejected")]
    Full {
        /// Queue name.
        queue: String,
        /// Jobs queued at the time of rejection.
        jobs: usize,
        /// Bytes queued at the time of rejection.
        bytes: u64,
    },

    /// Queue no longer accepts jobs.
    #[error("queue '{queue}' is closed")]
    Closed {
        /// Queue name.
        queue: String,
    },

    /// The handler returned an error.
    #[error("queue '{queue}' handler failed: {reason}")]
    HandlerFailed {
        /// Queue name.
        queue: String,
        /// Handler error rendered as text.
        reason: String,
    },

    /// The handler panicked; the worker kept running.
    #[error("queue '{queue}' handler panicked: {reason}")]
    HandlerPanicked {
        /// Queue name.
        queue: String,
        /// Panic payload rendered as text.
        reason: String,
    },

    /// Queue was aborted while jobs were still pending.
    #[error("queue '{queue}' aborted; {dropped} pending jobs dropped")]
    Aborted {
        /// Queue name.
        queue: String,
        /// Number of jobs that never ran.
        dropped: usize,
    },
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use datacollector::QueueError;
    ///
    /// let err = QueueError::Closed { queue: "transfers".into() };
    /// assert_eq!(err.as_label(), "queue_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Full { .. } => "queue_full",
            QueueError::Closed { .. } => "queue_closed",
            QueueError::HandlerFailed { .. } => "queue_handler_failed",
            QueueError::HandlerPanicked { .. } => "queue_handler_panicked",
            QueueError::Aborted { .. } => "queue_aborted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// What went wrong inside one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFailure {
    /// Handler returned an error; carries the root cause message.
    Failed {
        /// Root cause rendered as text.
        message: String,
    },
    /// Handler panicked; carries the panic payload.
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
    /// Handler did not complete within the shared fan-out timeout.
    TimedOut {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// # One failed handler invocation.
///
/// Produced by [`EventDispatcher::raise`](crate::dispatch::EventDispatcher::raise);
/// at most one per handler per raised event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{handler} failed handling {}: {}", subject(.event, .payload), describe(.failure))]
pub struct InvocationError {
    /// Which handler failed (target type and method).
    pub handler: HandlerIdentity,
    /// Event kind being dispatched.
    pub event: EventKind,
    /// Payload type name; custom notifications carry their notification type here.
    pub payload: Arc<str>,
    /// Failure detail.
    pub failure: InvocationFailure,
}

fn subject(event: &EventKind, payload: &Arc<str>) -> String {
    if payload.as_ref() == event.as_str() {
        payload.to_string()
    } else {
        format!("{event} ({payload})")
    }
}

fn describe(failure: &InvocationFailure) -> String {
    match failure {
        InvocationFailure::Failed { message } => format!("error: {message}"),
        InvocationFailure::Panicked { message } => format!("panic: {message}"),
        InvocationFailure::TimedOut { timeout } => format!("timed out after {timeout:?}"),
    }
}

impl InvocationError {
    /// Returns `true` if this is a synthetic timeout record.
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, InvocationFailure::TimedOut { .. })
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self.failure {
            InvocationFailure::Failed { .. } => "handler_failed",
            InvocationFailure::Panicked { .. } => "handler_panicked",
            InvocationFailure::TimedOut { .. } => "handler_timeout",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}

/// # Internal-consistency failures of the dispatcher.
///
/// These indicate a defect in the registration table, not a runtime data error.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// An event kind reached the dispatcher without a registration slot.
    #[error("no handler slot registered for event kind {kind}")]
    UnregisteredEvent {
        /// Kind that had no slot.
        kind: EventKind,
    },
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::UnregisteredEvent { .. } => "dispatch_unregistered_event",
        }
    }
}

/// # Configuration and collector loading errors.
///
/// Logged as warnings against the session; the offending collector is skipped.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HostError {
    /// Run settings document could not be parsed.
    #[error("invalid run settings: {reason}")]
    InvalidSettings {
        /// Parser error rendered as text.
        reason: String,
    },

    /// A collector with the same uri or type name was already configured.
    #[error("duplicate data collector '{name}' ignored")]
    DuplicateCollector {
        /// Friendly name of the ignored entry.
        name: String,
    },

    /// The plugin loader could not produce the collector.
    #[error("failed to load data collector '{name}': {reason}")]
    LoadFailed {
        /// Friendly name of the collector.
        name: String,
        /// Loader error rendered as text.
        reason: String,
    },

    /// The collector's own initialize hook failed.
    #[error("failed to initialize data collector '{name}': {reason}")]
    InitializeFailed {
        /// Friendly name of the collector.
        name: String,
        /// Root cause rendered as text.
        reason: String,
    },
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::InvalidSettings { .. } => "host_invalid_settings",
            HostError::DuplicateCollector { .. } => "host_duplicate_collector",
            HostError::LoadFailed { .. } => "host_load_failed",
            HostError::InitializeFailed { .. } => "host_initialize_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        self.to_string()
    }
}
