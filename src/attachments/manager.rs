//! # Attachment manager: session output directory and transfer bookkeeping.
//!
//! [`AttachmentManager`] owns the transfer [`JobQueue`], the session output
//! directory and the pending requests grouped by [`DataCollectionContext`].
//!
//! ## Architecture
//! ```text
//! collector ──► add_attachment(info)
//!                 ├─► destination = output_dir / [exec id] / file name
//!                 ├─► pending[ctx].push(request)         (under lock)
//!                 └─► queue.enqueue(TransferJob, 0) ──► FileTransferHandler
//!
//! host ──► collect_attachments(ctx)
//!            ├─► drain pending[ctx]                     (under lock)
//!            ├─► wait each request                      (no lock held)
//!            └─► Vec<AttachmentSet> grouped by collector uri
//! ```
//!
//! ## Rules
//! - Nothing is accepted before [`initialize`](AttachmentManager::initialize);
//!   such a call logs exactly one error and creates no request.
//! - Destinations of requests not yet collected are reserved; a colliding
//!   request is renamed `stem_N.ext` and a warning is sent to the sink.
//! - Files left on disk by earlier runs are replaced.
//! - [`dispose`](AttachmentManager::dispose) is idempotent.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{QueueError, TransferError};
use crate::events::{DataCollectionContext, SessionId};
use crate::queue::{ErrorCallback, JobQueue, JobQueueOptions};
use crate::sink::{CollectorMessage, MessageLevel, MessageSink, TracingSink};

use super::model::{AttachmentSet, FileTransferInformation, UriAttachment};
use super::request::{AttachmentRequest, destination_path, numbered_variant};
use super::transfer::{FileTransferHandler, TransferJob};

/// Name of the transfer queue in logs and errors.
pub const TRANSFER_QUEUE_NAME: &str = "attachment-transfer";

type SharedSink = Arc<RwLock<Arc<dyn MessageSink>>>;

#[derive(Default)]
struct State {
    output_dir: Option<PathBuf>,
    pending: HashMap<DataCollectionContext, Vec<Arc<AttachmentRequest>>>,
    reserved: HashSet<PathBuf>,
}

/// Accepts file transfers from collectors and aggregates their results.
pub struct AttachmentManager {
    results_folder: String,
    sink: SharedSink,
    state: Mutex<State>,
    queue: JobQueue<TransferJob>,
}

impl AttachmentManager {
    /// Creates a manager that reports to `tracing` until initialized.
    ///
    /// Spawns the transfer worker; must be called inside a tokio runtime.
    pub fn new(cfg: &Config) -> Self {
        Self::with_sink(cfg, Arc::new(TracingSink::new()))
    }

    /// Creates a manager with an explicit sink for messages raised before
    /// [`initialize`](Self::initialize).
    pub fn with_sink(cfg: &Config, sink: Arc<dyn MessageSink>) -> Self {
        let sink: SharedSink = Arc::new(RwLock::new(sink));
        let opts = JobQueueOptions {
            name: TRANSFER_QUEUE_NAME.to_string(),
            max_jobs: cfg.queue_job_limit(),
            max_bytes: cfg.queue_byte_limit(),
            block_when_full: cfg.queue_block_when_full,
        };
        let queue = JobQueue::new(opts, Arc::new(FileTransferHandler), queue_error_reporter(&sink));
        Self {
            results_folder: cfg.results_folder_name.clone(),
            sink,
            state: Mutex::new(State::default()),
            queue,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self) -> Arc<dyn MessageSink> {
        Arc::clone(&self.sink.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Creates the session output directory and switches to `sink`.
    ///
    /// Without a hint the directory is `<temp>/<results folder>/<session>`,
    /// otherwise `<expanded absolute hint>/<session>`. Returns the directory.
    pub async fn initialize(
        &self,
        session_id: SessionId,
        output_dir_hint: Option<&Path>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<PathBuf, TransferError> {
        let base = match output_dir_hint {
            Some(hint) => absolute(&expand_path(hint)),
            None => std::env::temp_dir().join(&self.results_folder),
        };
        let dir = base.join(session_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransferError::io("create_dir", &dir, &e))?;

        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = sink;
        self.lock().output_dir = Some(dir.clone());
        info!(session = %session_id, dir = %dir.display(), "attachment manager initialized");
        Ok(dir)
    }

    /// Session output directory, once initialized.
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.lock().output_dir.clone()
    }

    /// Number of requests not yet collected.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.values().map(Vec::len).sum()
    }

    /// Accepts a transfer request and queues it.
    ///
    /// Returns `false` if no request was created (not initialized, or the
    /// source has no file name). Queue rejections still create a request so
    /// the failure is reported by [`collect_attachments`](Self::collect_attachments).
    pub async fn add_attachment(&self, info: FileTransferInformation) -> bool {
        let sink = self.sink();
        let context = info.context;
        let collector = info.collector.clone();

        let request = {
            let mut state = self.lock();
            let Some(output_dir) = state.output_dir.clone() else {
                drop(state);
                let err = TransferError::NotInitialized;
                error!(collector = %collector, path = %info.path.display(), "{err}");
                sink.send_message(
                    CollectorMessage::new(MessageLevel::Error, err.as_message())
                        .with_collector(collector)
                        .with_test_case(context.test_case_id),
                );
                return false;
            };

            let requested = match destination_path(&output_dir, &context, &info.path) {
                Ok(dest) => dest,
                Err(err) => {
                    drop(state);
                    sink.send_message(
                        CollectorMessage::new(MessageLevel::Error, err.as_message())
                            .with_collector(collector)
                            .with_test_case(context.test_case_id),
                    );
                    return false;
                }
            };

            let destination = reserve(&mut state.reserved, &requested);
            let request = Arc::new(AttachmentRequest::new(info, destination.clone()));
            state
                .pending
                .entry(context)
                .or_default()
                .push(Arc::clone(&request));

            if destination != requested {
                drop(state);
                warn!(
                    collector = %collector,
                    requested = %requested.display(),
                    destination = %destination.display(),
                    "attachment name already in use; renamed"
                );
                sink.send_message(
                    CollectorMessage::new(
                        MessageLevel::Warning,
                        format!(
                            "attachment {} is already being transferred; saving as {}",
                            requested.display(),
                            destination.display()
                        ),
                    )
                    .with_collector(collector)
                    .with_test_case(context.test_case_id),
                );
            }
            request
        };

        let size = tokio::fs::metadata(request.source())
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if let Err((err, job)) = self
            .queue
            .submit(TransferJob::new(Arc::clone(&request), size), 0)
            .await
        {
            request.reject(err.as_message());
            drop(job);
        }
        true
    }

    /// Waits for every pending transfer of `context` and groups the results.
    ///
    /// Failed transfers are reported to the sink with the collector and test
    /// case id and left out of the result. Every drained request is released.
    pub async fn collect_attachments(&self, context: &DataCollectionContext) -> Vec<AttachmentSet> {
        let requests = self.lock().pending.remove(context).unwrap_or_default();
        let sink = self.sink();
        let mut sets: Vec<AttachmentSet> = Vec::new();

        for request in requests {
            match request.wait().await {
                Ok(()) => {
                    let collector = request.collector();
                    let pos = match sets.iter().position(|s| s.uri == collector.uri) {
                        Some(pos) => pos,
                        None => {
                            sets.push(AttachmentSet::new(collector));
                            sets.len() - 1
                        }
                    };
                    sets[pos].attachments.push(UriAttachment {
                        path: request.destination().to_path_buf(),
                        description: request.description().to_string(),
                    });
                }
                Err(err) => {
                    warn!(collector = %request.collector(), label = err.as_label(), "{err}");
                    sink.send_message(
                        CollectorMessage::new(MessageLevel::Error, err.as_message())
                            .with_collector(request.collector().clone())
                            .with_test_case(context.test_case_id),
                    );
                }
            }
            request.release();
            self.lock().reserved.remove(request.destination());
        }

        debug!(sets = sets.len(), "attachments collected");
        sets
    }

    /// Releases all pending requests, forgets the output directory and aborts the queue.
    ///
    /// Safe to call more than once.
    pub fn dispose(&self) {
        self.queue.abort();
        let pending = {
            let mut state = self.lock();
            state.output_dir = None;
            state.reserved.clear();
            std::mem::take(&mut state.pending)
        };
        let mut released = 0usize;
        for request in pending.into_values().flatten() {
            request.complete(Err(TransferError::Abandoned));
            if request.release() {
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, "attachment manager disposed with pending requests");
        }
    }
}

impl Drop for AttachmentManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Forwards queue faults that are not already reported as request outcomes.
fn queue_error_reporter(sink: &SharedSink) -> ErrorCallback {
    let sink = Arc::clone(sink);
    Arc::new(move |err: &QueueError| {
        if matches!(err, QueueError::Full { .. } | QueueError::Closed { .. }) {
            return;
        }
        let sink = Arc::clone(&sink.read().unwrap_or_else(PoisonError::into_inner));
        sink.send_message(CollectorMessage::new(MessageLevel::Error, err.as_message()));
    })
}

/// Reserves `requested` or the first free `stem_N.ext` variant.
fn reserve(reserved: &mut HashSet<PathBuf>, requested: &Path) -> PathBuf {
    let mut candidate = requested.to_path_buf();
    let mut n = 0;
    while reserved.contains(&candidate) {
        n += 1;
        candidate = numbered_variant(requested, n);
    }
    reserved.insert(candidate.clone());
    candidate
}

/// Expands `~`, `$VAR` and `${VAR}`. Unknown variables are left as written.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());

    let rest: &str = match raw.strip_prefix('~') {
        Some(tail) if tail.is_empty() || tail.starts_with('/') || tail.starts_with('\\') => {
            match home_dir() {
                Some(home) => {
                    out.push_str(&home);
                    tail
                }
                None => raw.as_ref(),
            }
        }
        _ => raw.as_ref(),
    };

    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let tail = &rest[i + 1..];
        let (name, consumed) = if let Some(braced) = tail.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], braced[..end].chars().count() + 2),
                None => ("", 0),
            }
        } else {
            let end = tail
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(tail.len());
            (&tail[..end], tail[..end].chars().count())
        };

        let value = if name.is_empty() {
            None
        } else {
            std::env::var(name).ok()
        };
        match value {
            Some(value) => {
                out.push_str(&value);
                for _ in 0..consumed {
                    chars.next();
                }
            }
            None => out.push(c),
        }
    }
    PathBuf::from(out)
}

fn home_dir() -> Option<String> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .filter(|h| !h.is_empty())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TestExecId;
    use crate::sink::CollectorIdentity;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CollectorMessage>>);

    impl MessageSink for Recorder {
        fn send_message(&self, message: CollectorMessage) {
            self.0.lock().unwrap().push(message);
        }
    }

    impl Recorder {
        fn errors(&self) -> Vec<CollectorMessage> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.level == MessageLevel::Error)
                .cloned()
                .collect()
        }
    }

    fn collector(uri: &str) -> CollectorIdentity {
        CollectorIdentity::new(uri, "Collector")
    }

    async fn initialized(dir: &Path) -> (AttachmentManager, Arc<Recorder>, SessionId) {
        let rec = Arc::new(Recorder::default());
        let manager = AttachmentManager::with_sink(&Config::default(), rec.clone());
        let session = SessionId::new();
        manager.initialize(session, Some(dir), rec.clone()).await.unwrap();
        (manager, rec, session)
    }

    #[tokio::test]
    async fn add_before_initialize_logs_one_error_and_creates_nothing() {
        let rec = Arc::new(Recorder::default());
        let manager = AttachmentManager::with_sink(&Config::default(), rec.clone());
        let ctx = DataCollectionContext::session(SessionId::new());

        let accepted = manager
            .add_attachment(FileTransferInformation::new(ctx, "/tmp/a.txt", collector("uri://a")))
            .await;

        assert!(!accepted);
        assert_eq!(manager.pending_count(), 0);
        let errors = rec.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text.as_ref(), "attachment manager is not initialized");
    }

    #[tokio::test]
    async fn hint_is_used_as_base_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _rec, session) = initialized(dir.path()).await;
        let out = manager.output_dir().unwrap();
        assert_eq!(out, absolute(dir.path()).join(session.to_string()));
        assert!(out.is_dir());
    }

    #[tokio::test]
    async fn default_directory_lives_under_temp_results_folder() {
        let manager = AttachmentManager::new(&Config::default());
        let session = SessionId::new();
        let out = manager
            .initialize(session, None, Arc::new(TracingSink::new()))
            .await
            .unwrap();
        assert_eq!(
            out,
            std::env::temp_dir().join("TestResults").join(session.to_string())
        );
        let _ = std::fs::remove_dir_all(&out);
    }

    #[tokio::test]
    async fn same_collector_files_merge_into_one_set() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, rec, session) = initialized(&dir.path().join("out")).await;
        let ctx = DataCollectionContext::session(session);

        for name in ["one.log", "two.log", "three.log"] {
            let src = dir.path().join(name);
            std::fs::write(&src, name).unwrap();
            assert!(
                manager
                    .add_attachment(FileTransferInformation::new(ctx, &src, collector("uri://cov")))
                    .await
            );
        }

        let sets = manager.collect_attachments(&ctx).await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].uri.as_ref(), "uri://cov");
        assert_eq!(sets[0].attachments.len(), 3);
        assert!(rec.errors().is_empty());
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn collect_with_nothing_pending_returns_no_sets() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _rec, session) = initialized(dir.path()).await;
        let sets = manager
            .collect_attachments(&DataCollectionContext::session(session))
            .await;
        assert!(sets.is_empty());
    }

    #[tokio::test]
    async fn failed_transfer_is_reported_and_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, rec, session) = initialized(&dir.path().join("out")).await;
        let test_case = Uuid::new_v4();
        let ctx = DataCollectionContext::test_case(session, test_case, TestExecId::new());

        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"ok").unwrap();
        manager
            .add_attachment(FileTransferInformation::new(ctx, &good, collector("uri://a")))
            .await;
        manager
            .add_attachment(FileTransferInformation::new(
                ctx,
                dir.path().join("missing.txt"),
                collector("uri://a"),
            ))
            .await;

        let sets = manager.collect_attachments(&ctx).await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].attachments.len(), 1);

        let errors = rec.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.starts_with("file not found"));
        assert_eq!(errors[0].collector.as_ref().map(|c| c.uri.as_ref()), Some("uri://a"));
        assert_eq!(errors[0].test_case_id, Some(test_case));
    }

    #[tokio::test]
    async fn colliding_names_are_renamed_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, rec, session) = initialized(&dir.path().join("out")).await;
        let ctx = DataCollectionContext::session(session);

        let first = dir.path().join("a/dump.txt");
        let second = dir.path().join("b/dump.txt");
        for (path, body) in [(&first, "first"), (&second, "second")] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
            manager
                .add_attachment(FileTransferInformation::new(ctx, path, collector("uri://a")))
                .await;
        }

        let sets = manager.collect_attachments(&ctx).await;
        let paths: Vec<&Path> = sets[0].attachments.iter().map(|a| a.path.as_path()).collect();
        let out = manager.output_dir().unwrap();
        assert_eq!(paths, [out.join("dump.txt"), out.join("dump_1.txt")]);
        assert_eq!(std::fs::read_to_string(out.join("dump_1.txt")).unwrap(), "second");

        let warnings = rec.0.lock().unwrap();
        assert!(warnings.iter().any(|m| m.level == MessageLevel::Warning));
    }

    #[tokio::test]
    async fn dispose_twice_releases_each_request_once() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _rec, session) = initialized(dir.path()).await;
        let ctx = DataCollectionContext::session(session);
        manager
            .add_attachment(FileTransferInformation::new(
                ctx,
                dir.path().join("never.txt"),
                collector("uri://a"),
            ))
            .await;
        let request = Arc::clone(&manager.lock().pending[&ctx][0]);

        manager.dispose();
        manager.dispose();

        assert!(request.is_released());
        assert!(!request.release());
        assert!(manager.output_dir().is_none());
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn expands_variables_and_home() {
        // SAFETY: test-only variable with a unique name.
        unsafe { std::env::set_var("DATACOLLECTOR_TEST_ROOT", "/data") };
        assert_eq!(
            expand_path(Path::new("$DATACOLLECTOR_TEST_ROOT/results")),
            PathBuf::from("/data/results")
        );
        assert_eq!(
            expand_path(Path::new("${DATACOLLECTOR_TEST_ROOT}/x")),
            PathBuf::from("/data/x")
        );
        assert_eq!(
            expand_path(Path::new("/keep/$DATACOLLECTOR_UNSET_VAR/x")),
            PathBuf::from("/keep/$DATACOLLECTOR_UNSET_VAR/x")
        );
        if let Some(home) = home_dir() {
            assert_eq!(expand_path(Path::new("~/r")), PathBuf::from(format!("{home}/r")));
        }
    }

    #[test]
    fn braced_non_ascii_variable_keeps_the_rest_of_the_path() {
        // SAFETY: test-only variable with a unique name.
        unsafe { std::env::set_var("DATACOLLECTOR_RÉSULTATS", "/données") };
        assert_eq!(
            expand_path(Path::new("${DATACOLLECTOR_RÉSULTATS}/über/x")),
            PathBuf::from("/données/über/x")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_of_one_name_get_distinct_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _rec, session) = initialized(&dir.path().join("out")).await;
        let manager = Arc::new(manager);
        let ctx = DataCollectionContext::session(session);

        let adds: Vec<_> = (0..32)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let source = dir.path().join(format!("src{i}")).join("dump.txt");
                std::fs::create_dir_all(source.parent().unwrap()).unwrap();
                std::fs::write(&source, format!("{i}")).unwrap();
                tokio::spawn(async move {
                    manager
                        .add_attachment(FileTransferInformation::new(ctx, &source, collector("uri://a")))
                        .await
                })
            })
            .collect();
        for add in adds {
            assert!(add.await.unwrap());
        }

        let sets = manager.collect_attachments(&ctx).await;
        assert_eq!(sets.len(), 1);
        let unique: std::collections::HashSet<&Path> =
            sets[0].attachments.iter().map(|a| a.path.as_path()).collect();
        assert_eq!(unique.len(), 32);
        assert!(unique.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn rejected_transfers_report_the_rejection_reason() {
        let dir = tempfile::tempdir().unwrap();
        let rec = Arc::new(Recorder::default());
        let cfg = Config {
            queue_max_jobs: 1,
            queue_block_when_full: false,
            ..Config::default()
        };
        let manager = AttachmentManager::with_sink(&cfg, rec.clone());
        let session = SessionId::new();
        manager.initialize(session, Some(dir.path()), rec.clone()).await.unwrap();
        let ctx = DataCollectionContext::session(session);

        for i in 0..16 {
            let source = dir.path().join(format!("burst{i}.bin"));
            std::fs::write(&source, vec![0u8; 64 * 1024]).unwrap();
            manager
                .add_attachment(FileTransferInformation::new(ctx, &source, collector("uri://a")))
                .await;
        }

        let sets = manager.collect_attachments(&ctx).await;
        let transferred = sets.first().map_or(0, |s| s.attachments.len());
        let errors = rec.errors();
        assert!(errors.iter().all(|m| m.text.starts_with("transfer was not queued")));
        assert_eq!(transferred + errors.len(), 16);
    }
}
