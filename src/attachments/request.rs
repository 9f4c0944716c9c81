//! # One pending file transfer.
//!
//! An [`AttachmentRequest`] is created when a collector asks to send a file
//! and is completed exactly once by the transfer worker. Waiters observe the
//! outcome through a `watch` channel owned by the request.
//!
//! ## Lifecycle
//! ```text
//! new ──► queued ──► complete(Ok | Err)   (first outcome wins)
//!                        │
//!            wait() ◄────┘ ──► release()   (idempotent)
//! ```
//!
//! ## Destination rule
//! `output_dir / [test execution id] / source file name`; the execution id
//! segment is present only for test-case scoped contexts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::error::TransferError;
use crate::events::DataCollectionContext;
use crate::sink::CollectorIdentity;

use super::model::{FileTransferInformation, TransferCallback};

type Outcome = Option<Result<(), TransferError>>;

/// Computes the deterministic destination of `source` for `context`.
pub fn destination_path(
    output_dir: &Path,
    context: &DataCollectionContext,
    source: &Path,
) -> Result<PathBuf, TransferError> {
    let file_name = source.file_name().ok_or_else(|| TransferError::InvalidSource {
        path: source.to_path_buf(),
    })?;
    let mut dest = output_dir.to_path_buf();
    if context.has_test_case() {
        if let Some(exec) = context.test_exec_id {
            dest.push(exec.to_string());
        }
    }
    dest.push(file_name);
    Ok(dest)
}

/// `stem_N.ext` variant of `path` (`stem_N` without an extension).
pub(crate) fn numbered_variant(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// A file transfer waiting for (or done with) the background worker.
pub struct AttachmentRequest {
    source: PathBuf,
    destination: PathBuf,
    context: DataCollectionContext,
    delete_source: bool,
    description: String,
    token: Option<String>,
    collector: CollectorIdentity,
    on_complete: Option<TransferCallback>,
    completion: watch::Sender<Outcome>,
    released: AtomicBool,
}

impl AttachmentRequest {
    pub(crate) fn new(info: FileTransferInformation, destination: PathBuf) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            source: info.path,
            destination,
            context: info.context,
            delete_source: info.delete_source,
            description: info.description,
            token: info.token,
            collector: info.collector,
            on_complete: info.on_complete,
            completion,
            released: AtomicBool::new(false),
        }
    }

    /// Source file.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Destination file inside the session output directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Context the transfer belongs to.
    pub fn context(&self) -> &DataCollectionContext {
        &self.context
    }

    /// Move (`true`) or copy.
    pub fn delete_source(&self) -> bool {
        self.delete_source
    }

    /// Attachment description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Correlation token.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Collector that requested the transfer.
    pub fn collector(&self) -> &CollectorIdentity {
        &self.collector
    }

    pub(crate) fn on_complete(&self) -> Option<&TransferCallback> {
        self.on_complete.as_ref()
    }

    /// Records the outcome. Returns `false` if one was already recorded.
    pub(crate) fn complete(&self, outcome: Result<(), TransferError>) -> bool {
        let mut outcome = Some(outcome);
        self.completion.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    /// Records a queue rejection unless an outcome is already set.
    pub(crate) fn reject(&self, reason: String) {
        self.complete(Err(TransferError::Rejected { reason }));
    }

    /// Returns `true` once an outcome is recorded.
    pub fn is_complete(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Waits for the outcome.
    pub async fn wait(&self) -> Result<(), TransferError> {
        let mut rx = self.completion.subscribe();
        let outcome = rx.wait_for(Option::is_some).await.map(|slot| (*slot).clone());
        match outcome {
            Ok(Some(result)) => result,
            _ => Err(TransferError::Abandoned),
        }
    }

    /// Marks the request as consumed. Returns `true` only on the first call.
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` once [`release`](Self::release) was called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for AttachmentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentRequest")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("collector", &self.collector.uri)
            .field("complete", &self.is_complete())
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SessionId, TestExecId};
    use std::sync::Arc;
    use uuid::Uuid;

    fn request(ctx: DataCollectionContext) -> AttachmentRequest {
        let info = FileTransferInformation::new(ctx, "/src/a.txt", CollectorIdentity::new("uri://c", "C"));
        AttachmentRequest::new(info, PathBuf::from("/out/a.txt"))
    }

    #[test]
    fn session_scoped_destination_has_no_subfolder() {
        let ctx = DataCollectionContext::session(SessionId::new());
        let dest = destination_path(Path::new("/out/S"), &ctx, Path::new("/logs/a.txt")).unwrap();
        assert_eq!(dest, PathBuf::from("/out/S/a.txt"));
    }

    #[test]
    fn test_case_destination_uses_execution_id() {
        let exec = TestExecId::new();
        let ctx = DataCollectionContext::test_case(SessionId::new(), Uuid::new_v4(), exec);
        let dest = destination_path(Path::new("/out/S"), &ctx, Path::new("/logs/a.txt")).unwrap();
        assert_eq!(dest, Path::new("/out/S").join(exec.to_string()).join("a.txt"));
    }

    #[test]
    fn source_without_file_name_is_invalid() {
        let ctx = DataCollectionContext::session(SessionId::new());
        let err = destination_path(Path::new("/out"), &ctx, Path::new("/")).unwrap_err();
        assert_eq!(err.as_label(), "transfer_invalid_source");
    }

    #[test]
    fn numbered_variant_keeps_extension() {
        assert_eq!(numbered_variant(Path::new("/o/a.txt"), 2), PathBuf::from("/o/a_2.txt"));
        assert_eq!(numbered_variant(Path::new("/o/dump"), 1), PathBuf::from("/o/dump_1"));
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let req = request(DataCollectionContext::session(SessionId::new()));
        assert!(!req.is_complete());
        assert!(req.complete(Err(TransferError::Abandoned)));
        assert!(!req.complete(Ok(())));
        assert!(matches!(req.wait().await, Err(TransferError::Abandoned)));
    }

    #[tokio::test]
    async fn rejection_recorded_before_drop_is_kept() {
        let req = request(DataCollectionContext::session(SessionId::new()));
        req.reject("queue full".into());
        req.complete(Err(TransferError::Abandoned));
        assert!(matches!(req.wait().await, Err(TransferError::Rejected { .. })));

        let done = request(DataCollectionContext::session(SessionId::new()));
        done.complete(Ok(()));
        done.reject("late".into());
        assert!(done.wait().await.is_ok());
    }

    #[tokio::test]
    async fn waiter_wakes_on_completion() {
        let req = Arc::new(request(DataCollectionContext::session(SessionId::new())));
        let waiter = {
            let req = Arc::clone(&req);
            tokio::spawn(async move { req.wait().await })
        };
        tokio::task::yield_now().await;
        req.complete(Ok(()));
        assert!(waiter.await.unwrap().is_ok());
    }

    #[test]
    fn release_is_idempotent() {
        let req = request(DataCollectionContext::session(SessionId::new()));
        assert!(req.release());
        assert!(!req.release());
        assert!(req.is_released());
    }
}
