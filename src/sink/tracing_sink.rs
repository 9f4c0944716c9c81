//! # Message sink backed by `tracing`.
//!
//! Forwards every [`CollectorMessage`] to the `tracing` subscriber at the
//! matching level. Useful as the default sink for a host that has no runner
//! connection yet, and in tests.
//!
//! ## Example output
//! ```text
//! WARN datacollector: duplicate data collector 'Blame' ignored
//! ERROR datacollector: file not found: /tmp/a.txt collector="Blame" test_case=Some(..)
//! ```

use tracing::{error, info, warn};

use super::message::{CollectorMessage, MessageLevel, MessageSink};

/// Message sink that writes to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    /// Construct a new [`TracingSink`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MessageSink for TracingSink {
    fn send_message(&self, m: CollectorMessage) {
        let collector = m.collector.as_ref().map(|c| c.friendly_name.as_ref());
        match m.level {
            MessageLevel::Informational => {
                info!(collector, test_case = ?m.test_case_id, "{}", m.text);
            }
            MessageLevel::Warning => {
                warn!(collector, test_case = ?m.test_case_id, "{}", m.text);
            }
            MessageLevel::Error => {
                error!(collector, test_case = ?m.test_case_id, "{}", m.text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_level_without_subscriber() {
        let sink = TracingSink::new();
        for level in [
            MessageLevel::Informational,
            MessageLevel::Warning,
            MessageLevel::Error,
        ] {
            sink.send_message(CollectorMessage::new(level, "hello"));
        }
    }
}
