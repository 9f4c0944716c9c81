//! Attachment transfer: requests, the background file mover and the manager.
//!
//! ## Contents
//! - [`AttachmentManager`] session output directory, request bookkeeping, result collection
//! - [`AttachmentRequest`] one pending transfer and its completion signal
//! - [`FileTransferHandler`] / [`TransferJob`] the transfer queue's job type and handler
//! - [`FileTransferInformation`], [`AttachmentSet`], [`UriAttachment`] data model

mod manager;
mod model;
mod request;
mod transfer;

pub use manager::{AttachmentManager, TRANSFER_QUEUE_NAME, expand_path};
pub use model::{
    AttachmentSet, FileTransferInformation, TransferCallback, TransferCompleted, UriAttachment,
};
pub use request::{AttachmentRequest, destination_path};
pub use transfer::{FileTransferHandler, TransferJob};
