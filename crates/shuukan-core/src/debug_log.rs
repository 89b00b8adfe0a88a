use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::locate::LocateTier;

/// Maximum number of events retained in the ring buffer.
const EVENT_LOG_CAPACITY: usize = 200;

/// A typed event from the locate/scrape/render pipeline.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    SectionLocated {
        tier: LocateTier,
        container_rule: &'static str,
    },
    SectionMissing {
        attempt: u32,
    },
    CardSkipped {
        index: usize,
        reason: String,
    },
    ScrapeCompleted {
        entries: usize,
        aggressive: bool,
    },
    ReferencesScanned {
        controls: usize,
        covers: usize,
    },
    ProgressConfirmed {
        id: String,
        watched: u32,
    },
    ProgressFailed {
        id: String,
        reason: String,
    },
    Navigated {
        url: String,
        home: bool,
    },
    Error {
        source: String,
        message: String,
    },
}

/// A timestamped event entry.
pub type EventEntry = (DateTime<Utc>, DebugEvent);

/// Bounded ring buffer of debug events.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventEntry>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
        }
    }

    /// Push a new event, evicting the oldest if at capacity.
    pub fn push(&mut self, event: DebugEvent) {
        self.push_at(Utc::now(), event);
    }

    pub fn push_at(&mut self, at: DateTime<Utc>, event: DebugEvent) {
        if self.entries.len() >= EVENT_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((at, event));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return a snapshot of all entries (newest last).
    pub fn snapshot(&self) -> Vec<EventEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Thread-safe handle to the event log.
pub type SharedEventLog = Arc<Mutex<EventLog>>;

/// Create a new shared event log.
pub fn shared_event_log() -> SharedEventLog {
    Arc::new(Mutex::new(EventLog::new()))
}
