//! Named deadline timers.
//!
//! All idle/debounce bookkeeping goes through one scheduler keyed by
//! `(document_id, concern)` instead of ad hoc timer refs per feature.
//! Re-arming a key replaces its deadline, which is exactly the trailing
//! debounce the automation loop needs: only the last qualifying change in a
//! quiet window is ever acted on.
//!
//! The scheduler is deterministic: it stores deadlines and answers
//! `due(now)`; the driver decides how often to poll.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub document_id: String,
    pub concern: &'static str,
}

impl TimerKey {
    pub fn new(document_id: impl Into<String>, concern: &'static str) -> Self {
        Self {
            document_id: document_id.into(),
            concern,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<TimerKey, DateTime<Utc>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a timer. An existing deadline for the same key is
    /// replaced, never queued behind.
    pub fn arm(&mut self, key: TimerKey, delay_ms: u64, now: DateTime<Utc>) {
        let deadline = now + Duration::milliseconds(delay_ms as i64);
        self.deadlines.insert(key, deadline);
    }

    pub fn cancel(&mut self, key: &TimerKey) {
        self.deadlines.remove(key);
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<DateTime<Utc>> {
        self.deadlines.get(key).copied()
    }

    /// Pop every key whose deadline has passed.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<TimerKey> {
        let fired: Vec<TimerKey> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &fired {
            self.deadlines.remove(key);
        }
        fired
    }

    /// Pop due keys belonging to one document, leaving other documents'
    /// deadlines armed.
    pub fn due_for(&mut self, document_id: &str, now: DateTime<Utc>) -> Vec<TimerKey> {
        let fired: Vec<TimerKey> = self
            .deadlines
            .iter()
            .filter(|(key, deadline)| key.document_id == document_id && **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &fired {
            self.deadlines.remove(key);
        }
        fired
    }

    /// Earliest pending deadline; drivers can sleep until then.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deadlines.values().min().copied()
    }
}
