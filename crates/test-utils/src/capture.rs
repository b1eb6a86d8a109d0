use std::sync::{Arc, Mutex};

use devloop::exec::OutputSink;

/// What a [`CaptureSink`] received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Line(String),
    Info(String),
    Error(String),
}

/// An `OutputSink` that keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    entries: Arc<Mutex<Vec<Captured>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Captured> {
        self.entries.lock().unwrap().clone()
    }

    /// Child output lines only.
    pub fn lines(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Captured::Line(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    /// Lifecycle and failure markers only.
    pub fn markers(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Captured::Info(m) | Captured::Error(m) => Some(m),
                Captured::Line(_) => None,
            })
            .collect()
    }
}

impl OutputSink for CaptureSink {
    fn write_line(&self, line: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .push(Captured::Line(String::from_utf8_lossy(line).into_owned()));
    }

    fn info(&self, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push(Captured::Info(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push(Captured::Error(message.to_string()));
    }
}
