//! Speculative edit candidates awaiting review.
//!
//! The queue holds up to eight proposals, newest first. Exactly one item
//! drives the visible preview at any time. Paragraph-patch items support
//! partial consumption: a reviewer can accept three of five proposed edits
//! and leave the rest pending — the item's identity persists while its patch
//! set shrinks.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::apply::{self, ApplyMode, ApplyOutcome};
use crate::document::{Document, EditTarget, EditTrigger, SnapshotStore};
use crate::patch::{self, ParagraphPatch};

pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewItem {
    pub id: String,
    pub title: String,
    /// Full candidate HTML, or the recomputed preview for patch items.
    pub content: String,
    pub mode: ApplyMode,
    pub target: EditTarget,
    pub created_at: DateTime<Utc>,
    pub trigger: EditTrigger,
    #[serde(default)]
    pub patches: Vec<ParagraphPatch>,
}

impl PreviewItem {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        mode: ApplyMode,
        target: EditTarget,
        trigger: EditTrigger,
        patches: Vec<ParagraphPatch>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            mode,
            target,
            created_at: Utc::now(),
            trigger,
            patches,
        }
    }
}

/// Result of consuming a single patch from a pending item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinglePatchOutcome {
    /// Document mutated; `item_removed` when that was the item's last patch.
    Applied { item_removed: bool },
    /// Anchor drift: the document was not touched and the patch stays pending.
    AnchorMiss,
}

#[derive(Debug, Default)]
pub struct PreviewQueue {
    /// Head (index 0) is the newest candidate.
    items: Vec<PreviewItem>,
    active_id: Option<String>,
    capacity: usize,
}

impl PreviewQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            active_id: None,
            capacity: capacity.max(1),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[PreviewItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&PreviewItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&PreviewItem> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    /// Prepend a candidate and make it active. Past capacity, the oldest
    /// item (tail) is evicted.
    pub fn enqueue(&mut self, item: PreviewItem) {
        self.active_id = Some(item.id.clone());
        self.items.insert(0, item);
        while self.items.len() > self.capacity {
            let evicted = self.items.pop();
            if let Some(evicted) = evicted {
                tracing::debug!(item_id = %evicted.id, "Preview queue full, evicting oldest");
            }
        }
    }

    /// Silent no-op when the id is not present.
    pub fn activate(&mut self, id: &str) {
        if self.items.iter().any(|item| item.id == id) {
            self.active_id = Some(id.to_string());
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<PreviewItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        let removed = self.items.remove(index);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.items.first().map(|item| item.id.clone());
        }
        Some(removed)
    }

    /// Apply exactly one patch from a pending item against the live document.
    ///
    /// On success the document is mutated immediately (snapshot taken first),
    /// the patch leaves the item's pending set, and the item's preview is
    /// recomputed from the remaining patches against the new document state.
    /// Consuming the last patch removes the item.
    pub fn apply_single_patch(
        &mut self,
        doc: &mut Document,
        snapshots: &mut dyn SnapshotStore,
        item_id: &str,
        patch_id: &str,
    ) -> Result<SinglePatchOutcome> {
        let index = self.require_patch_item(item_id)?;
        let Some(patch) = self.items[index]
            .patches
            .iter()
            .find(|p| p.id == patch_id)
            .cloned()
        else {
            bail!("patch '{}' not found in preview item '{}'", patch_id, item_id);
        };

        let target = self.items[index].target;
        let outcome = apply::apply_edit(
            doc,
            snapshots,
            "",
            ApplyMode::UpdateBlock,
            target,
            std::slice::from_ref(&patch),
        )?;
        if outcome == ApplyOutcome::NoPatchesMatched {
            return Ok(SinglePatchOutcome::AnchorMiss);
        }

        self.items[index].patches.retain(|p| p.id != patch_id);
        let item_removed = self.refresh_patch_item(doc, index)?;
        Ok(SinglePatchOutcome::Applied { item_removed })
    }

    /// Drop one patch from a pending item without touching the document.
    /// Returns true when that emptied the item and it left the queue.
    pub fn dismiss_single_patch(
        &mut self,
        doc: &Document,
        item_id: &str,
        patch_id: &str,
    ) -> Result<bool> {
        let index = self.require_patch_item(item_id)?;
        let before = self.items[index].patches.len();
        self.items[index].patches.retain(|p| p.id != patch_id);
        if self.items[index].patches.len() == before {
            bail!("patch '{}' not found in preview item '{}'", patch_id, item_id);
        }
        self.refresh_patch_item(doc, index)
    }

    fn require_patch_item(&self, item_id: &str) -> Result<usize> {
        let Some(index) = self.items.iter().position(|item| item.id == item_id) else {
            bail!("preview item '{}' not found", item_id);
        };
        if self.items[index].mode != ApplyMode::UpdateBlock {
            bail!(
                "preview item '{}' has mode {}, patch operations need update_block",
                item_id,
                self.items[index].mode.as_str()
            );
        }
        Ok(index)
    }

    /// Recompute the preview from the remaining patches against the current
    /// document state; remove the item when no patches remain.
    fn refresh_patch_item(&mut self, doc: &Document, index: usize) -> Result<bool> {
        if self.items[index].patches.is_empty() {
            let id = self.items[index].id.clone();
            self.remove(&id);
            return Ok(true);
        }
        let target = self.items[index].target;
        let outcome = patch::apply_patches(doc.target_content(target), &self.items[index].patches)?;
        self.items[index].content = outcome.html;
        Ok(false)
    }

    /// Queue invariant: non-empty queue has exactly one active id and it is
    /// present among the items. Debug aid for tests.
    pub fn invariant_holds(&self) -> bool {
        match (&self.active_id, self.items.is_empty()) {
            (None, true) => true,
            (Some(id), false) => self.items.iter().filter(|item| &item.id == id).count() == 1,
            _ => false,
        }
    }
}
