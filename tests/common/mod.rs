#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use datacollector::{CollectorMessage, MessageLevel, MessageSink};

/// Message sink that keeps every message for assertions.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<CollectorMessage>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<CollectorMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: MessageLevel) -> Vec<CollectorMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.level == level)
            .collect()
    }
}

impl MessageSink for RecordingSink {
    fn send_message(&self, message: CollectorMessage) {
        self.messages.lock().unwrap().push(message);
    }
}
