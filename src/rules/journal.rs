//! Diagnostic sink for rule runs

use std::sync::Mutex;

/// Fire-and-forget event sink
pub trait RunLog: Send + Sync {
    fn record(&self, event: &str);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogJournal;

impl RunLog for LogJournal {
    fn record(&self, event: &str) {
        log::info!(target: "inbox_rules::journal", "{}", event);
    }
}

/// Keeps events in memory, for callers that render them later
#[derive(Debug, Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<String>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RunLog for MemoryJournal {
    fn record(&self, event: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.to_string());
    }
}
