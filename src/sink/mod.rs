//! # Message sink: the user-visible diagnostics channel.
//!
//! Collectors and the platform report diagnostics as [`CollectorMessage`]s
//! through a [`MessageSink`]. The sink is the only way transfer errors and
//! handler failures reach the test run's message stream.
//!
//! ## Architecture
//! ```text
//! AttachmentManager ──┐
//! CollectorLogger   ──┼──► MessageSink::send_message(CollectorMessage)
//! HostManager       ──┘            │
//!                                  ├──► TracingSink  (tracing events)
//!                                  └──► runner adapter (wire protocol, external)
//! ```

mod message;
mod tracing_sink;

pub use message::{CollectorIdentity, CollectorMessage, MessageLevel, MessageSink};
pub use tracing_sink::TracingSink;
