//! The externally owned document record and the snapshot boundary.
//!
//! The pipeline reads and proposes writes to `content`, `translated_content`,
//! `goal_plan`, `automation_strategy` and the execution log; everything else
//! on the record belongs to the surrounding workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::AutomationStrategy;
use crate::plan::GoalPlan;

/// Execution-log entries older than this are silently dropped.
pub const EXECUTION_LOG_CAP: usize = 20;

/// Which column of a dual-column document an edit addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditTarget {
    Original,
    Translated,
}

/// What initiated an edit or plan change; recorded on previews and audit
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditTrigger {
    Init,
    ManualExecute,
    AutoExecute,
    ManualReplan,
    AutoReplan,
}

impl EditTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            EditTrigger::Init => "init",
            EditTrigger::ManualExecute => "manual_execute",
            EditTrigger::AutoExecute => "auto_execute",
            EditTrigger::ManualReplan => "manual_replan",
            EditTrigger::AutoReplan => "auto_replan",
        }
    }
}

/// Append-only audit record of an automated or plan-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalExecutionEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub trigger: EditTrigger,
    pub changed_sections: Vec<String>,
    pub summary: String,
}

impl GoalExecutionEntry {
    pub fn new(trigger: EditTrigger, changed_sections: Vec<String>, summary: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            at: Utc::now(),
            trigger,
            changed_sections,
            summary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Sanitized HTML body.
    #[serde(default)]
    pub content: String,
    /// Second column for dual-language documents.
    #[serde(default)]
    pub translated_content: Option<String>,
    #[serde(default)]
    pub goal_plan: Option<GoalPlan>,
    #[serde(default)]
    pub goal_plan_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub goal_execution_log: Vec<GoalExecutionEntry>,
    #[serde(default)]
    pub automation_strategy: Option<AutomationStrategy>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_action_items: Vec<String>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn has_translated_column(&self) -> bool {
        self.translated_content.is_some()
    }

    /// A document without a translated column always resolves to the
    /// original column, regardless of caller intent.
    pub fn resolve_target(&self, wanted: EditTarget) -> EditTarget {
        match wanted {
            EditTarget::Translated if self.has_translated_column() => EditTarget::Translated,
            _ => EditTarget::Original,
        }
    }

    pub fn target_content(&self, target: EditTarget) -> &str {
        match self.resolve_target(target) {
            EditTarget::Original => &self.content,
            EditTarget::Translated => self.translated_content.as_deref().unwrap_or(""),
        }
    }

    pub fn set_target_content(&mut self, target: EditTarget, html: String) {
        match self.resolve_target(target) {
            EditTarget::Original => self.content = html,
            EditTarget::Translated => self.translated_content = Some(html),
        }
    }

    /// Append an audit entry, keeping only the most recent
    /// [`EXECUTION_LOG_CAP`] records.
    pub fn push_execution_entry(&mut self, entry: GoalExecutionEntry) {
        self.goal_execution_log.push(entry);
        if self.goal_execution_log.len() > EXECUTION_LOG_CAP {
            let excess = self.goal_execution_log.len() - EXECUTION_LOG_CAP;
            self.goal_execution_log.drain(..excess);
        }
    }
}

/// Rollback collaborator. Implemented outside the core; every committing
/// mutation calls this before its first write so the prior state is always
/// recoverable.
pub trait SnapshotStore {
    fn snapshot(&mut self, document: &Document);
}

/// In-memory store used by tests and as a minimal default.
#[derive(Debug, Default)]
pub struct MemorySnapshots {
    snapshots: Vec<Document>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn last(&self) -> Option<&Document> {
        self.snapshots.last()
    }
}

impl SnapshotStore for MemorySnapshots {
    fn snapshot(&mut self, document: &Document) {
        self.snapshots.push(document.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_column_coerces_translated_target() {
        let doc = Document::new("d1");
        assert_eq!(doc.resolve_target(EditTarget::Translated), EditTarget::Original);

        let mut dual = Document::new("d2");
        dual.translated_content = Some("<p>bonjour</p>".to_string());
        assert_eq!(dual.resolve_target(EditTarget::Translated), EditTarget::Translated);
    }

    #[test]
    fn target_content_round_trip() {
        let mut doc = Document::new("d1");
        doc.translated_content = Some(String::new());
        doc.set_target_content(EditTarget::Translated, "<p>hola</p>".to_string());
        assert_eq!(doc.target_content(EditTarget::Translated), "<p>hola</p>");
        assert_eq!(doc.target_content(EditTarget::Original), "");
    }

    #[test]
    fn execution_log_is_capped_to_most_recent() {
        let mut doc = Document::new("d1");
        for i in 0..25 {
            doc.push_execution_entry(GoalExecutionEntry::new(
                EditTrigger::AutoExecute,
                vec![],
                format!("entry {i}"),
            ));
        }
        assert_eq!(doc.goal_execution_log.len(), EXECUTION_LOG_CAP);
        assert_eq!(doc.goal_execution_log[0].summary, "entry 5");
        assert_eq!(doc.goal_execution_log.last().expect("tail").summary, "entry 24");
    }

    #[test]
    fn memory_snapshots_record_prior_state() {
        let mut doc = Document::new("d1");
        doc.content = "<p>before</p>".to_string();
        let mut store = MemorySnapshots::new();
        store.snapshot(&doc);
        doc.content = "<p>after</p>".to_string();
        assert_eq!(store.last().expect("snapshot").content, "<p>before</p>");
    }
}
