//! Paragraph-level patches against block anchors.
//!
//! A batch is applied strictly in array order against the progressively
//! mutated HTML: each patch re-segments the current string, so later patches
//! see the effects of earlier ones. An anchor that no longer matches is a
//! per-patch skip, never a failure of the batch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::html;

/// Hard cap on patches accepted per batch.
pub const MAX_PATCHES_PER_BATCH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchAction {
    Replace,
    InsertBefore,
    InsertAfter,
    Delete,
}

impl PatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PatchAction::Replace => "replace",
            PatchAction::InsertBefore => "insert_before",
            PatchAction::InsertAfter => "insert_after",
            PatchAction::Delete => "delete",
        }
    }
}

/// One localized edit against a single block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParagraphPatch {
    pub id: String,
    pub action: PatchAction,
    /// Anchor snippet, compared whitespace-normalized against block text.
    pub find: String,
    /// New HTML; required for every action except `delete`.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ParagraphPatch {
    /// A patch the engine can act on: non-empty anchor, and content present
    /// for every action that writes.
    pub fn is_actionable(&self) -> bool {
        if html::normalize_text(&self.find).is_empty() {
            return false;
        }
        match self.action {
            PatchAction::Delete => true,
            _ => self
                .content
                .as_deref()
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false),
        }
    }

    /// Parse a model-returned JSON array into a usable batch. Invalid entries
    /// are dropped with a warning and the batch is truncated to the cap;
    /// model sloppiness must not fail the whole edit.
    pub fn parse_batch(raw: &serde_json::Value) -> Vec<ParagraphPatch> {
        let Some(items) = raw.as_array() else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        for item in items {
            match serde_json::from_value::<ParagraphPatch>(item.clone()) {
                Ok(patch) if patch.is_actionable() => batch.push(patch),
                Ok(patch) => {
                    tracing::warn!(patch_id = %patch.id, "Dropping non-actionable patch");
                }
                Err(e) => {
                    tracing::warn!("Dropping malformed patch entry: {}", e);
                }
            }
            if batch.len() == MAX_PATCHES_PER_BATCH {
                tracing::warn!("Patch batch truncated to {}", MAX_PATCHES_PER_BATCH);
                break;
            }
        }
        batch
    }
}

/// Result of applying one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    pub html: String,
    pub applied_ids: Vec<String>,
    pub skipped_ids: Vec<String>,
}

impl PatchOutcome {
    pub fn nothing_applied(&self) -> bool {
        self.applied_ids.is_empty()
    }
}

/// Apply a patch batch to the document HTML.
///
/// Pure: the caller decides whether to commit the returned HTML. Errors only
/// on structurally invalid input markup; every anchor miss lands in
/// `skipped_ids` and leaves the intermediate tree untouched for that patch.
pub fn apply_patches(input: &str, patches: &[ParagraphPatch]) -> Result<PatchOutcome> {
    html::validate(input).context("patch target is not well-formed HTML")?;

    let mut current = input.to_string();
    let mut applied_ids = Vec::new();
    let mut skipped_ids = Vec::new();

    for patch in patches {
        if !patch.is_actionable() {
            skipped_ids.push(patch.id.clone());
            continue;
        }
        // Re-segment the current tree: later patches must see the effects of
        // earlier ones, and order within the batch is contractual.
        let blocks = html::segment(&current)
            .context("patch batch produced structurally invalid HTML")?;
        let find = html::normalize_text(&patch.find);
        let Some(index) = html::find_anchor(&blocks, &find) else {
            tracing::debug!(patch_id = %patch.id, "Anchor miss, patch skipped");
            skipped_ids.push(patch.id.clone());
            continue;
        };
        let block = &blocks[index];
        let content = patch.content.as_deref().unwrap_or_default();
        current = match patch.action {
            PatchAction::Replace => {
                splice(&current, block.start, block.end, content)
            }
            PatchAction::InsertBefore => splice(&current, block.start, block.start, content),
            PatchAction::InsertAfter => splice(&current, block.end, block.end, content),
            PatchAction::Delete => splice(&current, block.start, block.end, ""),
        };
        applied_ids.push(patch.id.clone());
    }

    Ok(PatchOutcome {
        html: current,
        applied_ids,
        skipped_ids,
    })
}

fn splice(html: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(html.len() + replacement.len());
    out.push_str(&html[..start]);
    out.push_str(replacement);
    out.push_str(&html[end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(id: &str, action: PatchAction, find: &str, content: Option<&str>) -> ParagraphPatch {
        ParagraphPatch {
            id: id.to_string(),
            action,
            find: find.to_string(),
            content: content.map(str::to_string),
            reason: None,
        }
    }

    #[test]
    fn noop_batch_returns_input_unchanged() {
        let html = "<p>untouched</p>";
        let outcome = apply_patches(html, &[]).expect("apply");
        assert_eq!(outcome.html, html);
        assert!(outcome.applied_ids.is_empty());
        assert!(outcome.skipped_ids.is_empty());
    }

    #[test]
    fn replace_substitutes_outer_markup() {
        let html = "<h2>Intro</h2><p>old text here</p><p>tail</p>";
        let patches = [patch(
            "p1",
            PatchAction::Replace,
            "old text here",
            Some("<p>new text</p>"),
        )];
        let outcome = apply_patches(html, &patches).expect("apply");
        assert_eq!(outcome.html, "<h2>Intro</h2><p>new text</p><p>tail</p>");
        assert_eq!(outcome.applied_ids, vec!["p1"]);
    }

    #[test]
    fn insert_before_and_after_splice_adjacent() {
        let html = "<p>middle</p>";
        let patches = [
            patch("a", PatchAction::InsertBefore, "middle", Some("<p>head</p>")),
            patch("b", PatchAction::InsertAfter, "middle", Some("<p>tail</p>")),
        ];
        let outcome = apply_patches(html, &patches).expect("apply");
        assert_eq!(outcome.html, "<p>head</p><p>middle</p><p>tail</p>");
        assert_eq!(outcome.applied_ids, vec!["a", "b"]);
    }

    #[test]
    fn delete_removes_the_block() {
        let html = "<p>keep</p><p>drop me</p>";
        let patches = [patch("d", PatchAction::Delete, "drop me", None)];
        let outcome = apply_patches(html, &patches).expect("apply");
        assert_eq!(outcome.html, "<p>keep</p>");
    }

    #[test]
    fn anchor_drift_lands_in_skipped_and_leaves_html_alone() {
        let html = "<p>the paragraph was edited since</p>";
        let patches = [patch(
            "stale",
            PatchAction::Replace,
            "original wording no longer present",
            Some("<p>replacement</p>"),
        )];
        let outcome = apply_patches(html, &patches).expect("apply");
        assert_eq!(outcome.html, html);
        assert_eq!(outcome.skipped_ids, vec!["stale"]);
        assert!(outcome.nothing_applied());
    }

    #[test]
    fn later_patches_see_earlier_mutations() {
        let html = "<p>first</p>";
        let patches = [
            patch(
                "one",
                PatchAction::Replace,
                "first",
                Some("<p>second</p>"),
            ),
            // Anchors on text that only exists after the first patch ran.
            patch(
                "two",
                PatchAction::InsertAfter,
                "second",
                Some("<p>third</p>"),
            ),
        ];
        let outcome = apply_patches(html, &patches).expect("apply");
        assert_eq!(outcome.html, "<p>second</p><p>third</p>");
        assert_eq!(outcome.applied_ids, vec!["one", "two"]);
    }

    #[test]
    fn batch_is_deterministic() {
        let html = "<p>alpha</p><p>beta</p>";
        let patches = [
            patch("x", PatchAction::Delete, "alpha", None),
            patch("y", PatchAction::Replace, "missing", Some("<p>z</p>")),
        ];
        let first = apply_patches(html, &patches).expect("apply once");
        let second = apply_patches(html, &patches).expect("apply twice");
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_input_fails_without_partial_result() {
        let patches = [patch("p", PatchAction::Delete, "x", None)];
        assert!(apply_patches("<p>broken", &patches).is_err());
    }

    #[test]
    fn parse_batch_drops_invalid_and_truncates() {
        let mut items = vec![
            json!({"id": "ok", "action": "replace", "find": "a", "content": "<p>b</p>"}),
            json!({"id": "no-content", "action": "replace", "find": "a"}),
            json!({"id": "no-find", "action": "delete", "find": "  "}),
            json!({"bogus": true}),
        ];
        for i in 0..20 {
            items.push(json!({
                "id": format!("bulk-{i}"),
                "action": "delete",
                "find": format!("anchor {i}")
            }));
        }
        let batch = ParagraphPatch::parse_batch(&serde_json::Value::Array(items));
        assert_eq!(batch.len(), MAX_PATCHES_PER_BATCH);
        assert_eq!(batch[0].id, "ok");
        assert!(batch.iter().all(|p| p.is_actionable()));
    }
}
