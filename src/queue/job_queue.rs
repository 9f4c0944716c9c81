//! # Bounded job queue with a dedicated worker.
//!
//! [`JobQueue`] accepts typed jobs up to a maximum count and cumulative size and
//! hands each one to a single [`JobHandler`] on a background worker task.
//!
//! ## Architecture
//! ```text
//! producers (many)                      worker (one)
//!   enqueue(job, prio) ──┐
//!   enqueue(job, prio) ──┼──► [priority heap] ──► handler.handle(job)
//!   enqueue(job, prio) ──┘     (bounded)              ├─► Err   → HandlerFailed
//!                                                     └─► panic → HandlerPanicked
//! ```
//!
//! ## Rules
//! - **Ordering**: higher priority first; equal priorities run in arrival order (FIFO)
//! - **Capacity**: full queue either suspends the producer or rejects the job,
//!   per [`JobQueueOptions::block_when_full`]
//! - **No silent loss**: every rejected, failed or dropped job reaches the error callback
//! - **Fault isolation**: handler errors and panics are reported; the worker continues
//! - **Oversized jobs**: a job larger than the byte limit is still accepted into an empty queue
//!
//! ## Shutdown
//! - [`JobQueue::shutdown`] stops accepting, drains pending jobs, then joins the worker.
//! - [`JobQueue::abort`] stops accepting and processing immediately; pending jobs
//!   are dropped and reported once as [`QueueError::Aborted`]. It never waits on
//!   the worker, so it is safe to call from a teardown path.
//! - Dropping the queue aborts it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::QueueError;

/// Callback receiving every queue error.
pub type ErrorCallback = Arc<dyn Fn(&QueueError) + Send + Sync>;

/// A unit of work accepted by [`JobQueue`].
pub trait Job: Send + 'static {
    /// Size counted against [`JobQueueOptions::max_bytes`].
    fn size_bytes(&self) -> u64 {
        0
    }
}

/// Handler invoked once per dequeued job.
///
/// Called from the queue's worker task; jobs are handled one at a time.
#[async_trait]
pub trait JobHandler<T>: Send + Sync + 'static {
    /// Processes a single job.
    async fn handle(&self, job: T) -> anyhow::Result<()>;
}

/// Function-backed job handler.
///
/// Wraps a closure that creates a new future per job.
pub struct JobFn<F> {
    f: F,
}

impl<F> JobFn<F> {
    /// Creates a handler from a closure.
    pub fn new<T, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self { f }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc<T, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut, T> JobHandler<T> for JobFn<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job: T) -> anyhow::Result<()> {
        (self.f)(job).await
    }
}

/// Construction parameters for [`JobQueue`].
#[derive(Clone, Debug)]
pub struct JobQueueOptions {
    /// Diagnostic name used in errors and logs.
    pub name: String,
    /// Maximum number of queued jobs (`None` = unbounded).
    pub max_jobs: Option<usize>,
    /// Maximum cumulative size of queued jobs (`None` = unbounded).
    pub max_bytes: Option<u64>,
    /// `true` = producers wait for space, `false` = full queue rejects the job.
    pub block_when_full: bool,
}

impl JobQueueOptions {
    /// Unbounded queue with the given name.
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_jobs: None,
            max_bytes: None,
            block_when_full: true,
        }
    }
}

/// Heap entry: higher priority first, then lower sequence number first.
struct Entry<T> {
    priority: i32,
    seq: u64,
    size: u64,
    job: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State<T> {
    heap: BinaryHeap<Entry<T>>,
    bytes: u64,
    next_seq: u64,
    closed: bool,
}

struct Shared<T> {
    opts: JobQueueOptions,
    state: Mutex<State<T>>,
    job_ready: Notify,
    space_freed: Notify,
    stop: CancellationToken,
    on_error: ErrorCallback,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_room(&self, state: &State<T>, size: u64) -> bool {
        if state.heap.is_empty() {
            return true;
        }
        let jobs_ok = self.opts.max_jobs.is_none_or(|max| state.heap.len() < max);
        let bytes_ok = self
            .opts
            .max_bytes
            .is_none_or(|max| state.bytes.saturating_add(size) <= max);
        jobs_ok && bytes_ok
    }

    fn report(&self, err: &QueueError) {
        warn!(queue = %self.opts.name, label = err.as_label(), "{err}");
        (self.on_error)(err);
    }

    fn closed_error(&self) -> QueueError {
        QueueError::Closed {
            queue: self.opts.name.clone(),
        }
    }
}

/// Bounded, priority-aware job queue backed by one worker task.
///
/// Must be created inside a tokio runtime (the worker is spawned immediately).
pub struct JobQueue<T: Job> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Job> JobQueue<T> {
    /// Creates the queue and spawns its worker.
    pub fn new<H>(opts: JobQueueOptions, handler: Arc<H>, on_error: ErrorCallback) -> Self
    where
        H: JobHandler<T> + ?Sized,
    {
        let shared = Arc::new(Shared {
            opts,
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                bytes: 0,
                next_seq: 0,
                closed: false,
            }),
            job_ready: Notify::new(),
            space_freed: Notify::new(),
            stop: CancellationToken::new(),
            on_error,
        });
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), handler));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.shared.opts.name
    }

    /// Number of jobs waiting (not counting the one being handled).
    pub fn len(&self) -> usize {
        self.shared.lock().heap.len()
    }

    /// Returns `true` if no job is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative size of waiting jobs.
    pub fn queued_bytes(&self) -> u64 {
        self.shared.lock().bytes
    }

    /// Returns `true` once the queue stopped accepting jobs.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Enqueues a job.
    ///
    /// When the queue is full, either waits for space (`block_when_full`) or
    /// rejects the job with [`QueueError::Full`]. Every error is also passed to
    /// the error callback. A rejected job is dropped; use
    /// [`submit`](Self::submit) to get it back.
    pub async fn enqueue(&self, job: T, priority: i32) -> Result<(), QueueError> {
        self.submit(job, priority).await.map_err(|(err, _job)| err)
    }

    /// Like [`enqueue`](Self::enqueue), but hands a rejected job back to the caller.
    pub async fn submit(&self, job: T, priority: i32) -> Result<(), (QueueError, T)> {
        let shared = &self.shared;
        let size = job.size_bytes();

        loop {
            let space = shared.space_freed.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            {
                let mut state = shared.lock();
                if state.closed {
                    drop(state);
                    let err = shared.closed_error();
                    shared.report(&err);
                    return Err((err, job));
                }
                if shared.has_room(&state, size) {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.bytes = state.bytes.saturating_add(size);
                    state.heap.push(Entry {
                        priority,
                        seq,
                        size,
                        job,
                    });
                    drop(state);
                    shared.job_ready.notify_one();
                    return Ok(());
                }
                if !shared.opts.block_when_full {
                    let err = QueueError::Full {
                        queue: shared.opts.name.clone(),
                        jobs: state.heap.len(),
                        bytes: state.bytes,
                    };
                    drop(state);
                    shared.report(&err);
                    return Err((err, job));
                }
            }

            debug!(queue = %shared.opts.name, "queue full; waiting for space");
            tokio::select! {
                _ = &mut space => {}
                _ = shared.stop.cancelled() => {
                    let err = shared.closed_error();
                    shared.report(&err);
                    return Err((err, job));
                }
            }
        }
    }

    /// Stops accepting jobs, lets the worker drain what is queued, and waits for it.
    pub async fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.closed = true;
        }
        self.shared.job_ready.notify_one();
        self.shared.space_freed.notify_waiters();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    /// Stops accepting and processing immediately; pending jobs are dropped.
    ///
    /// Does not wait for the worker: it observes the stop token at its next
    /// suspension point and exits. Calling this more than once is a no-op.
    pub fn abort(&self) {
        if self.shared.stop.is_cancelled() {
            return;
        }
        let dropped: Vec<Entry<T>> = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.bytes = 0;
            state.heap.drain().collect()
        };
        self.shared.stop.cancel();
        self.shared.space_freed.notify_waiters();

        if !dropped.is_empty() {
            self.shared.report(&QueueError::Aborted {
                queue: self.shared.opts.name.clone(),
                dropped: dropped.len(),
            });
        }
    }
}

impl<T: Job> Drop for JobQueue<T> {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn run_worker<T, H>(shared: Arc<Shared<T>>, handler: Arc<H>)
where
    T: Job,
    H: JobHandler<T> + ?Sized,
{
    loop {
        let ready = shared.job_ready.notified();
        tokio::pin!(ready);
        ready.as_mut().enable();

        let next = {
            let mut state = shared.lock();
            match state.heap.pop() {
                Some(entry) => {
                    state.bytes = state.bytes.saturating_sub(entry.size);
                    Some(entry)
                }
                None if state.closed => return,
                None => None,
            }
        };

        let Some(entry) = next else {
            tokio::select! {
                _ = &mut ready => {}
                _ = shared.stop.cancelled() => return,
            }
            continue;
        };
        shared.space_freed.notify_waiters();

        let fut = AssertUnwindSafe(handler.handle(entry.job)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = shared.stop.cancelled() => return,
            outcome = fut => outcome,
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => shared.report(&QueueError::HandlerFailed {
                queue: shared.opts.name.clone(),
                reason: format!("{err:#}"),
            }),
            Err(panic) => shared.report(&QueueError::HandlerPanicked {
                queue: shared.opts.name.clone(),
                reason: panic_message(panic.as_ref()),
            }),
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
