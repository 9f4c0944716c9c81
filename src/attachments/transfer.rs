//! # Background copy/move of one attachment.
//!
//! [`FileTransferHandler`] is the [`JobHandler`] of the transfer queue. Its
//! outcome is never returned to the queue: it is recorded on the request and
//! surfaced later by [`collect_attachments`](super::AttachmentManager::collect_attachments).
//!
//! ## Steps
//! 1. source must be an existing file
//! 2. destination directory is created if missing
//! 3. a stale destination file is removed (last writer wins)
//! 4. copy, or move when `delete_source` is set (rename, falling back to copy + remove)
//! 5. completion callback (panics contained), then the outcome is recorded

use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::queue::{Job, JobHandler, panic_message};

use super::model::TransferCompleted;
use super::request::AttachmentRequest;

/// Queue item wrapping one [`AttachmentRequest`].
///
/// If the job is dropped without running (queue aborted, worker stopped) the
/// request is completed with [`TransferError::Abandoned`], so waiters never hang.
pub struct TransferJob {
    request: Arc<AttachmentRequest>,
    size: u64,
}

impl TransferJob {
    pub(crate) fn new(request: Arc<AttachmentRequest>, size: u64) -> Self {
        Self { request, size }
    }
}

impl Job for TransferJob {
    fn size_bytes(&self) -> u64 {
        self.size
    }
}

impl Drop for TransferJob {
    fn drop(&mut self) {
        self.request.complete(Err(TransferError::Abandoned));
    }
}

/// Performs file transfers for the attachment queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTransferHandler;

#[async_trait]
impl JobHandler<TransferJob> for FileTransferHandler {
    async fn handle(&self, job: TransferJob) -> anyhow::Result<()> {
        let request = &job.request;
        let result = transfer(request).await;

        match &result {
            Ok(()) => debug!(
                source = %request.source().display(),
                destination = %request.destination().display(),
                moved = request.delete_source(),
                "attachment transferred"
            ),
            Err(err) => debug!(label = err.as_label(), "{err}"),
        }

        if let Some(callback) = request.on_complete() {
            let completed = TransferCompleted {
                token: request.token().map(str::to_owned),
                source: request.source().to_path_buf(),
                destination: request.destination().to_path_buf(),
                error: result.as_ref().err().cloned(),
            };
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&completed))) {
                warn!(
                    collector = %request.collector(),
                    panic = %panic_message(panic.as_ref()),
                    "transfer completion callback panicked"
                );
            }
        }

        request.complete(result);
        Ok(())
    }
}

async fn transfer(request: &AttachmentRequest) -> Result<(), TransferError> {
    let source = request.source();
    let destination = request.destination();

    match fs::metadata(source).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(TransferError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(TransferError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        Err(err) => return Err(TransferError::io("stat", source, &err)),
    }

    if source == destination {
        return Ok(());
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io("create_dir", parent, &e))?;
    }

    match fs::remove_file(destination).await {
        Ok(()) => debug!(path = %destination.display(), "replaced stale attachment"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(TransferError::io("remove_stale", destination, &err)),
    }

    if request.delete_source() {
        if let Err(err) = fs::rename(source, destination).await {
            debug!(error = %err, "rename failed; falling back to copy and remove");
            fs::copy(source, destination)
                .await
                .map_err(|e| TransferError::io("move", destination, &e))?;
            fs::remove_file(source)
                .await
                .map_err(|e| TransferError::io("move", source, &e))?;
        }
    } else {
        fs::copy(source, destination)
            .await
            .map_err(|e| TransferError::io("copy", destination, &e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::model::FileTransferInformation;
    use crate::events::{DataCollectionContext, SessionId};
    use crate::sink::CollectorIdentity;
    use std::path::Path;
    use std::sync::Mutex;

    fn request_for(source: &Path, delete: bool) -> FileTransferInformation {
        FileTransferInformation::new(
            DataCollectionContext::session(SessionId::new()),
            source,
            CollectorIdentity::new("uri://c", "C"),
        )
        .delete_source(delete)
    }

    async fn run(info: FileTransferInformation, destination: &Path) -> Arc<AttachmentRequest> {
        let request = Arc::new(AttachmentRequest::new(info, destination.to_path_buf()));
        FileTransferHandler
            .handle(TransferJob::new(Arc::clone(&request), 0))
            .await
            .unwrap();
        request
    }

    #[tokio::test]
    async fn copies_into_new_directory_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"hello").unwrap();
        let dst = dir.path().join("out/nested/a.txt");

        let req = run(request_for(&src, false), &dst).await;

        assert!(req.wait().await.is_ok());
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
        assert!(src.exists());
    }

    #[tokio::test]
    async fn move_removes_source_and_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"fresh").unwrap();
        let dst = dir.path().join("out/a.txt");
        std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
        std::fs::write(&dst, b"stale").unwrap();

        let req = run(request_for(&src, true), &dst).await;

        assert!(req.wait().await.is_ok());
        assert_eq!(std::fs::read(&dst).unwrap(), b"fresh");
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn missing_source_is_recorded_not_returned() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("missing.txt");
        let dst = dir.path().join("out/missing.txt");

        let req = run(request_for(&src, false), &dst).await;

        match req.wait().await {
            Err(TransferError::SourceNotFound { path }) => assert_eq!(path, src),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn panicking_callback_does_not_lose_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("missing.txt");
        let dst = dir.path().join("out/missing.txt");
        let seen = Arc::new(Mutex::new(None));
        let seen_cb = Arc::clone(&seen);
        let info = request_for(&src, false)
            .with_token("t-1")
            .on_complete(move |done| {
                *seen_cb.lock().unwrap() = Some((done.token.clone(), done.error.is_some()));
                panic!("callback bug");
            });

        let req = run(info, &dst).await;

        assert!(matches!(req.wait().await, Err(TransferError::SourceNotFound { .. })));
        assert_eq!(*seen.lock().unwrap(), Some((Some("t-1".to_string()), true)));
    }

    #[tokio::test]
    async fn dropped_job_abandons_request() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("out/a.txt");
        let request = Arc::new(AttachmentRequest::new(request_for(&src, false), dst));

        drop(TransferJob::new(Arc::clone(&request), 0));

        assert!(matches!(request.wait().await, Err(TransferError::Abandoned)));
    }
}
