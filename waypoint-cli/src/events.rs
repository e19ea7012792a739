//! Human-readable trace of resolution steps, shared by every probe task.

use std::sync::Arc;

use parking_lot::Mutex;

/// Append-only log handle. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "waypoint::events", "{message}");
        self.lines.lock().push(message);
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// Snapshot for a viewer.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}
