//! Bounded background job queue.
//!
//! This module provides a generic, priority-aware queue with a single
//! dedicated worker task that runs one configured [`JobHandler`] per job.
//!
//! ## Contents
//! - [`JobQueue`] the queue and its worker
//! - [`JobQueueOptions`] name, limits and the full-queue policy
//! - [`JobHandler`] / [`JobFn`] the handler invoked for every job
//! - [`Job`] size accounting for queued items
//!
//! ## Quick wiring
//! ```text
//! AttachmentManager ──► JobQueue<TransferJob>::enqueue(job, priority)
//!      └─► worker task ──► FileTransferHandler::handle(job)
//! ```

mod job_queue;

pub use job_queue::{ErrorCallback, Job, JobFn, JobHandler, JobQueue, JobQueueOptions};
pub(crate) use job_queue::panic_message;
