//! Edit application engine: turns an accepted candidate into the new
//! persisted document content.
//!
//! Every committing path snapshots the document before its first write, so
//! the prior state is always recoverable one level back. A patch-mode apply
//! where no anchor matches is a signaled no-op, never a silent one.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::document::{Document, EditTarget, SnapshotStore};
use crate::html;
use crate::patch::{self, ParagraphPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Replace,
    Append,
    Prepend,
    UpdateBlock,
}

impl ApplyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyMode::Replace => "replace",
            ApplyMode::Append => "append",
            ApplyMode::Prepend => "prepend",
            ApplyMode::UpdateBlock => "update_block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        /// Set when a leading heading was promoted to the document title.
        new_title: Option<String>,
        applied_ids: Vec<String>,
        skipped_ids: Vec<String>,
    },
    /// Patch mode where every anchor missed: the document was not touched
    /// and the caller must surface this instead of reporting success.
    NoPatchesMatched,
}

/// Candidate HTML opening with an `<h1>`/`<h2>` promotes that heading's text
/// to the document title; the heading is stripped from the body.
fn split_leading_heading(content: &str) -> Option<(String, String)> {
    let blocks = html::segment(content).ok()?;
    let first = blocks.first()?;
    if first.tag != "h1" && first.tag != "h2" {
        return None;
    }
    if !content[..first.start].trim().is_empty() {
        return None;
    }
    let body = content[first.end..].trim_start().to_string();
    Some((first.text.clone(), body))
}

fn join_with_break(a: &str, b: &str) -> String {
    if a.is_empty() {
        b.to_string()
    } else if b.is_empty() {
        a.to_string()
    } else {
        format!("{}<br/>{}", a, b)
    }
}

/// Apply an accepted candidate to the document, side-effecting on `doc`.
///
/// The caller is responsible for sanitizing `content` beforehand and for
/// generating only the delta for append/prepend modes.
pub fn apply_edit(
    doc: &mut Document,
    snapshots: &mut dyn SnapshotStore,
    content: &str,
    mode: ApplyMode,
    target: EditTarget,
    patches: &[ParagraphPatch],
) -> Result<ApplyOutcome> {
    let target = doc.resolve_target(target);
    let existing = doc.target_content(target).to_string();

    let (next, new_title, applied_ids, skipped_ids) = match mode {
        ApplyMode::Replace => match split_leading_heading(content) {
            Some((title, body)) => (body, Some(title), Vec::new(), Vec::new()),
            None => (content.to_string(), None, Vec::new(), Vec::new()),
        },
        ApplyMode::Append => (join_with_break(&existing, content), None, Vec::new(), Vec::new()),
        ApplyMode::Prepend => (join_with_break(content, &existing), None, Vec::new(), Vec::new()),
        ApplyMode::UpdateBlock if patches.is_empty() => {
            // Legacy raw block: visually distinct container, appended.
            let wrapped = format!("<section data-update-block=\"v1\">{}</section>", content);
            (join_with_break(&existing, &wrapped), None, Vec::new(), Vec::new())
        }
        ApplyMode::UpdateBlock => {
            let outcome = patch::apply_patches(&existing, patches)?;
            if outcome.nothing_applied() {
                tracing::info!(document_id = %doc.id, "No patches matched, edit not applied");
                return Ok(ApplyOutcome::NoPatchesMatched);
            }
            (outcome.html, None, outcome.applied_ids, outcome.skipped_ids)
        }
    };

    snapshots.snapshot(doc);
    if let Some(title) = &new_title {
        doc.title = title.clone();
    }
    doc.set_target_content(target, next);

    Ok(ApplyOutcome::Applied {
        new_title,
        applied_ids,
        skipped_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemorySnapshots;
    use crate::patch::PatchAction;

    fn doc_with(content: &str) -> Document {
        let mut doc = Document::new("d1");
        doc.content = content.to_string();
        doc
    }

    #[test]
    fn replace_promotes_leading_heading_to_title() {
        let mut doc = doc_with("<p>old</p>");
        let mut snapshots = MemorySnapshots::new();
        let outcome = apply_edit(
            &mut doc,
            &mut snapshots,
            "<h1>Launch checklist</h1><p>new body</p>",
            ApplyMode::Replace,
            EditTarget::Original,
            &[],
        )
        .expect("apply");

        assert_eq!(doc.title, "Launch checklist");
        assert_eq!(doc.content, "<p>new body</p>");
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                new_title: Some("Launch checklist".to_string()),
                applied_ids: vec![],
                skipped_ids: vec![],
            }
        );
        assert_eq!(snapshots.last().expect("snapshot").content, "<p>old</p>");
    }

    #[test]
    fn replace_without_heading_replaces_whole_target() {
        let mut doc = doc_with("<p>old</p>");
        let mut snapshots = MemorySnapshots::new();
        apply_edit(
            &mut doc,
            &mut snapshots,
            "<p>entirely new</p>",
            ApplyMode::Replace,
            EditTarget::Original,
            &[],
        )
        .expect("apply");
        assert_eq!(doc.content, "<p>entirely new</p>");
        assert!(doc.title.is_empty());
    }

    #[test]
    fn append_and_prepend_join_with_break() {
        let mut doc = doc_with("<p>base</p>");
        let mut snapshots = MemorySnapshots::new();
        apply_edit(
            &mut doc,
            &mut snapshots,
            "<p>tail</p>",
            ApplyMode::Append,
            EditTarget::Original,
            &[],
        )
        .expect("append");
        assert_eq!(doc.content, "<p>base</p><br/><p>tail</p>");

        apply_edit(
            &mut doc,
            &mut snapshots,
            "<p>head</p>",
            ApplyMode::Prepend,
            EditTarget::Original,
            &[],
        )
        .expect("prepend");
        assert!(doc.content.starts_with("<p>head</p><br/>"));
    }

    #[test]
    fn update_block_without_patches_wraps_and_appends() {
        let mut doc = doc_with("<p>base</p>");
        let mut snapshots = MemorySnapshots::new();
        apply_edit(
            &mut doc,
            &mut snapshots,
            "<p>note</p>",
            ApplyMode::UpdateBlock,
            EditTarget::Original,
            &[],
        )
        .expect("apply");
        assert_eq!(
            doc.content,
            "<p>base</p><br/><section data-update-block=\"v1\"><p>note</p></section>"
        );
    }

    #[test]
    fn update_block_with_drifted_patches_is_a_signaled_noop() {
        let mut doc = doc_with("<p>current text</p>");
        let mut snapshots = MemorySnapshots::new();
        let patches = [ParagraphPatch {
            id: "p1".to_string(),
            action: PatchAction::Replace,
            find: "text that drifted away".to_string(),
            content: Some("<p>replacement</p>".to_string()),
            reason: None,
        }];
        let outcome = apply_edit(
            &mut doc,
            &mut snapshots,
            "",
            ApplyMode::UpdateBlock,
            EditTarget::Original,
            &patches,
        )
        .expect("apply");

        assert_eq!(outcome, ApplyOutcome::NoPatchesMatched);
        assert_eq!(doc.content, "<p>current text</p>");
        assert!(snapshots.is_empty());
    }

    #[test]
    fn translated_target_redirects_and_coerces() {
        let mut doc = doc_with("<p>orig</p>");
        doc.translated_content = Some("<p>trans</p>".to_string());
        let mut snapshots = MemorySnapshots::new();
        apply_edit(
            &mut doc,
            &mut snapshots,
            "<p>nouveau</p>",
            ApplyMode::Replace,
            EditTarget::Translated,
            &[],
        )
        .expect("apply");
        assert_eq!(doc.translated_content.as_deref(), Some("<p>nouveau</p>"));
        assert_eq!(doc.content, "<p>orig</p>");

        // Single-column document: translated intent lands on original.
        let mut single = doc_with("<p>solo</p>");
        apply_edit(
            &mut single,
            &mut snapshots,
            "<p>changed</p>",
            ApplyMode::Replace,
            EditTarget::Translated,
            &[],
        )
        .expect("apply");
        assert_eq!(single.content, "<p>changed</p>");
        assert!(single.translated_content.is_none());
    }
}
