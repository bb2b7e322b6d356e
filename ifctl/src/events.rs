//! Append-only session event log.
//!
//! Connection transitions, exchange outcomes, daemon pushes, and decode
//! failures all land here as short timestamped lines. The log is a
//! bounded ring: once full, the oldest entries fall off. Writers live
//! with the dispatcher worker; readers take snapshots through a cloned
//! handle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;

/// Default ring capacity.
pub(crate) const DEFAULT_LOG_CAPACITY: usize = 256;

/// Severity class of a logged session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine lifecycle or daemon-push note.
    Info,
    /// Suspicious but non-fatal, e.g. a rejected record.
    Warn,
    /// A failed exchange or daemon-reported error.
    Error,
}

/// One entry in the session event log.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    /// When the entry was recorded.
    pub at: SystemTime,
    /// Severity class.
    pub severity: Severity,
    /// Short human-readable description.
    pub message: String,
}

/// Bounded in-memory event log shared between the session and its
/// dispatcher worker.
#[derive(Debug, Clone)]
pub(crate) struct EventLog {
    entries: Arc<Mutex<VecDeque<SessionEvent>>>,
    capacity: usize,
}

impl EventLog {
    /// Creates a log holding at most `capacity` entries.
    pub(crate) fn new(capacity: usize) -> Self {
        Self { entries: Arc::new(Mutex::new(VecDeque::new())), capacity: capacity.max(1) }
    }

    /// Appends an entry, evicting the oldest when full.
    pub(crate) fn record(&self, severity: Severity, message: impl Into<String>) {
        let entry = SessionEvent { at: SystemTime::now(), severity, message: message.into() };
        if let Ok(mut q) = self.entries.lock() {
            if q.len() == self.capacity {
                q.pop_front();
            }
            q.push_back(entry);
        }
    }

    /// Copies the current entries, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<SessionEvent> {
        self.entries.lock().map(|q| q.iter().cloned().collect()).unwrap_or_default()
    }

    /// The most recent entry, if any.
    pub(crate) fn last(&self) -> Option<SessionEvent> {
        self.entries.lock().ok().and_then(|q| q.back().cloned())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let log = EventLog::new(8);
        log.record(Severity::Info, "one");
        log.record(Severity::Error, "two");
        let all = log.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "one");
        assert_eq!(all[1].message, "two");
        assert_eq!(log.last().map(|e| e.message), Some("two".into()));
    }

    #[test]
    fn evicts_oldest_when_full() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.record(Severity::Info, format!("entry {i}"));
        }
        let all = log.snapshot();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "entry 2");
        assert_eq!(all[2].message, "entry 4");
    }

    #[test]
    fn timestamps_are_monotonic_enough() {
        let log = EventLog::new(2);
        let before = SystemTime::now();
        log.record(Severity::Warn, "stamped");
        let entry = log.last().map(|e| e.at);
        assert!(entry.is_some_and(|at| at >= before));
    }
}
