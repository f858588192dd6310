//! Operation status surface.
//!
//! Every pipeline operation converts its outcome into a `StatusEvent` at the
//! boundary where it occurs. Raw errors never propagate into the
//! document-mutation path; the embedding UI only ever sees one of these.

use chrono::{DateTime, Utc};
use flume::Sender;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Idle,
    Running,
    Success,
    Warning,
    Error,
}

impl OpStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OpStatus::Idle => "idle",
            OpStatus::Running => "running",
            OpStatus::Success => "success",
            OpStatus::Warning => "warning",
            OpStatus::Error => "error",
        }
    }
}

/// A user-visible status change for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub document_id: String,
    pub status: OpStatus,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Fan-out handle for status events. A pipeline without a subscriber still
/// logs every event through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct StatusSink {
    tx: Option<Sender<StatusEvent>>,
}

impl StatusSink {
    pub fn new(tx: Sender<StatusEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that only logs. Used by tests and headless embedders.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, document_id: &str, status: OpStatus, message: impl Into<String>) {
        let message = message.into();
        match status {
            OpStatus::Warning => {
                tracing::warn!(document_id, status = status.as_str(), "{}", message)
            }
            OpStatus::Error => {
                tracing::warn!(document_id, status = status.as_str(), "{}", message)
            }
            _ => tracing::debug!(document_id, status = status.as_str(), "{}", message),
        }
        if let Some(tx) = &self.tx {
            let event = StatusEvent {
                document_id: document_id.to_string(),
                status,
                message,
                at: Utc::now(),
            };
            // A full or disconnected receiver must never stall the editor.
            let _ = tx.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_delivers_to_subscriber() {
        let (tx, rx) = flume::unbounded();
        let sink = StatusSink::new(tx);
        sink.emit("doc-1", OpStatus::Warning, "risk gate rejected");

        let event = rx.try_recv().expect("event delivered");
        assert_eq!(event.document_id, "doc-1");
        assert_eq!(event.status, OpStatus::Warning);
        assert_eq!(event.message, "risk gate rejected");
    }

    #[test]
    fn disconnected_sink_does_not_panic() {
        let sink = StatusSink::disconnected();
        sink.emit("doc-1", OpStatus::Success, "applied");
    }
}
