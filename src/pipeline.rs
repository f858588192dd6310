//! Pipeline orchestration.
//!
//! Wires the router, generator, preview queue, application engine and
//! automation controller together: a user instruction or a background
//! insight comes in, a reviewable (or auto-applied) edit comes out, and every
//! outcome leaves through the status sink. All document mutation happens
//! synchronously between generation calls; the three cancellation lanes are
//! independent so stopping a foreground edit never stops automation.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::apply::{self, ApplyMode, ApplyOutcome};
use crate::automation::{
    AutomationAction, AutomationController, AutomationStrategy, ControllerEvent, TargetPreference,
};
use crate::config::PipelineConfig;
use crate::document::{Document, EditTarget, EditTrigger, GoalExecutionEntry, SnapshotStore};
use crate::generate::{CancelToken, GenerateError, Generator, RetrySlot};
use crate::patch::{self, ParagraphPatch};
use crate::plan;
use crate::preview::{PreviewItem, PreviewQueue};
use crate::router::{self, Skill};
use crate::status::{OpStatus, StatusSink};

const EDIT_SYSTEM_PROMPT: &str = "You are a document editing assistant. Work on the \
     provided HTML document and return only the requested edit, as clean HTML. \
     Never repeat unchanged content unless asked to replace the document.";

const PATCH_SYSTEM_PROMPT: &str = "You are a document editing assistant. Return ONLY a JSON \
     array of paragraph patches: \
     [{\"id\": \"p1\", \"action\": \"replace|insert_before|insert_after|delete\", \
     \"find\": \"anchor text from the document\", \"content\": \"<p>new html</p>\", \
     \"reason\": \"...\"}]. Use short, exact anchor snippets. At most 12 patches.";

const PLAN_SYSTEM_PROMPT: &str = "You are a planning assistant. Return ONLY a JSON object: \
     {\"summary\": \"...\", \"milestones\": [{\"title\", \"due\", \"status\"}], \
     \"tasks\": [{\"title\", \"priority\", \"status\"}], \
     \"nextActions\": [{\"title\", \"reason\"}], \"risks\": [{\"title\", \"level\"}]}. \
     Keep it small: at most 8 milestones, 20 tasks, 3 next actions, 6 risks.";

fn preference_target(preference: TargetPreference) -> EditTarget {
    match preference {
        TargetPreference::Translated => EditTarget::Translated,
        _ => EditTarget::Original,
    }
}

pub struct EditPipeline {
    config: PipelineConfig,
    generator: Arc<dyn Generator>,
    status: StatusSink,
    queue: PreviewQueue,
    controller: AutomationController,
    retry: RetrySlot,
    foreground_cancel: CancelToken,
    automation_cancel: CancelToken,
    workflow_cancel: CancelToken,
}

impl EditPipeline {
    pub fn new(config: PipelineConfig, generator: Arc<dyn Generator>, status: StatusSink) -> Self {
        let queue = PreviewQueue::new(config.queue.capacity);
        let controller =
            AutomationController::new(config.automation.clone(), config.risk.clone());
        Self {
            config,
            generator,
            status,
            queue,
            controller,
            retry: RetrySlot::default(),
            foreground_cancel: CancelToken::new(),
            automation_cancel: CancelToken::new(),
            workflow_cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn queue(&self) -> &PreviewQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut PreviewQueue {
        &mut self.queue
    }

    pub fn has_pending_retry(&self) -> bool {
        !self.retry.is_empty()
    }

    /// Stop the in-flight foreground generation, if any. Automation and
    /// workflow lanes are unaffected.
    pub fn stop_foreground(&self) {
        self.foreground_cancel.cancel();
    }

    pub fn stop_automation(&self) {
        self.automation_cancel.cancel();
    }

    pub fn stop_workflow(&self) {
        self.workflow_cancel.cancel();
    }

    /// Load and normalize the document's automation strategy.
    pub fn strategy_for(&self, doc: &Document) -> AutomationStrategy {
        let mut strategy = doc
            .automation_strategy
            .clone()
            .unwrap_or_else(|| AutomationStrategy::defaults(&self.config.automation));
        strategy.normalize(&self.config.automation, doc.has_translated_column());
        strategy
    }

    /// Handle a natural-language edit instruction from the chat entry point.
    ///
    /// Routes applicable skills, generates, wraps the result into a preview
    /// candidate and enqueues it. Returns the new preview item id, or `None`
    /// when generation was interrupted or failed (the outcome is surfaced
    /// through the status sink either way).
    pub async fn handle_instruction(
        &mut self,
        doc: &mut Document,
        text: &str,
        mode: ApplyMode,
        target: EditTarget,
        catalog: &[Skill],
    ) -> Result<Option<String>> {
        self.status
            .emit(&doc.id, OpStatus::Running, "generating edit");

        let routed = router::route(self.generator.as_ref(), &self.config.router, text, catalog).await;
        let mut system_prompt = if mode == ApplyMode::UpdateBlock {
            PATCH_SYSTEM_PROMPT.to_string()
        } else {
            EDIT_SYSTEM_PROMPT.to_string()
        };
        for skill in &routed.skills {
            system_prompt.push_str("\n\nSkill instruction: ");
            system_prompt.push_str(&skill.prompt);
        }
        if routed.auto_search {
            system_prompt.push_str("\n\nWeb search results may be appended to the request.");
        }
        let user_prompt = format!(
            "Document ({}):\n{}\n\nInstruction:\n{}",
            doc.title,
            doc.target_content(target),
            text
        );

        self.foreground_cancel.reset();
        let generated = self
            .generator
            .generate(&system_prompt, &user_prompt, None, &self.foreground_cancel)
            .await;
        let reply = match generated {
            Ok(reply) => reply,
            Err(GenerateError::Aborted) => {
                self.retry.store(&system_prompt, &user_prompt);
                self.status
                    .emit(&doc.id, OpStatus::Warning, "generation interrupted, retry available");
                return Ok(None);
            }
            Err(GenerateError::Failed(msg)) => {
                self.retry.store(&system_prompt, &user_prompt);
                self.status
                    .emit(&doc.id, OpStatus::Error, format!("generation failed: {}", msg));
                return Ok(None);
            }
        };

        let id = self.enqueue_reply(doc, text, &reply, mode, target, EditTrigger::ManualExecute)?;
        self.status
            .emit(&doc.id, OpStatus::Success, "edit preview ready");
        Ok(Some(id))
    }

    /// Re-run the exact last interrupted or failed request. Single use.
    pub async fn retry_last(
        &mut self,
        doc: &mut Document,
        mode: ApplyMode,
        target: EditTarget,
    ) -> Result<Option<String>> {
        let Some(request) = self.retry.take() else {
            return Ok(None);
        };
        self.status.emit(&doc.id, OpStatus::Running, "retrying last request");
        self.foreground_cancel.reset();
        let generated = self
            .generator
            .generate(
                &request.system_prompt,
                &request.user_prompt,
                None,
                &self.foreground_cancel,
            )
            .await;
        match generated {
            Ok(reply) => {
                let id =
                    self.enqueue_reply(doc, "retry", &reply, mode, target, EditTrigger::ManualExecute)?;
                self.status.emit(&doc.id, OpStatus::Success, "edit preview ready");
                Ok(Some(id))
            }
            Err(GenerateError::Aborted) => {
                self.status
                    .emit(&doc.id, OpStatus::Warning, "generation interrupted");
                Ok(None)
            }
            Err(GenerateError::Failed(msg)) => {
                self.status
                    .emit(&doc.id, OpStatus::Error, format!("generation failed: {}", msg));
                Ok(None)
            }
        }
    }

    /// Wrap a model reply into a preview candidate and enqueue it.
    fn enqueue_reply(
        &mut self,
        doc: &Document,
        title_hint: &str,
        reply: &str,
        mode: ApplyMode,
        target: EditTarget,
        trigger: EditTrigger,
    ) -> Result<String> {
        let target = doc.resolve_target(target);
        let (content, patches) = if mode == ApplyMode::UpdateBlock {
            let patches = parse_patch_reply(reply, self.config.queue.max_patches_per_batch);
            if patches.is_empty() {
                (reply.trim().to_string(), Vec::new())
            } else {
                let preview = patch::apply_patches(doc.target_content(target), &patches)?.html;
                (preview, patches)
            }
        } else {
            (reply.trim().to_string(), Vec::new())
        };

        let title: String = title_hint.chars().take(60).collect();
        let item = PreviewItem::new(title, content, mode, target, trigger, patches);
        let id = item.id.clone();
        self.queue.enqueue(item);
        Ok(id)
    }

    /// Apply a queued candidate to the live document and drop it from the
    /// queue. A patch candidate whose anchors all drifted stays queued and
    /// surfaces a warning instead of silently writing nothing.
    pub fn apply_candidate(
        &mut self,
        doc: &mut Document,
        snapshots: &mut dyn SnapshotStore,
        item_id: &str,
    ) -> Result<Option<ApplyOutcome>> {
        let Some(item) = self.queue.get(item_id).cloned() else {
            return Ok(None);
        };
        let outcome = apply::apply_edit(
            doc,
            snapshots,
            &item.content,
            item.mode,
            item.target,
            &item.patches,
        )?;
        match &outcome {
            ApplyOutcome::NoPatchesMatched => {
                self.status.emit(
                    &doc.id,
                    OpStatus::Warning,
                    "no patches matched the current document",
                );
            }
            ApplyOutcome::Applied { applied_ids, skipped_ids, .. } => {
                self.queue.remove(item_id);
                doc.push_execution_entry(GoalExecutionEntry::new(
                    item.trigger,
                    vec![item.mode.as_str().to_string()],
                    item.title.clone(),
                ));
                let message = if item.patches.is_empty() {
                    "edit applied".to_string()
                } else {
                    format!(
                        "{} of {} patches applied",
                        applied_ids.len(),
                        applied_ids.len() + skipped_ids.len()
                    )
                };
                self.status.emit(&doc.id, OpStatus::Success, message);
            }
        }
        Ok(Some(outcome))
    }

    pub fn dismiss_candidate(&mut self, doc: &Document, item_id: &str) {
        if self.queue.remove(item_id).is_some() {
            self.status.emit(&doc.id, OpStatus::Idle, "preview dismissed");
        }
    }

    /// Entry point for "content or insights changed" notifications. Also
    /// folds user checkbox edits back into the stored goal plan.
    pub fn document_changed(
        &mut self,
        doc: &mut Document,
        now: DateTime<Utc>,
        foreground_busy: bool,
        pending_selection: bool,
    ) {
        if let Some(plan) = &doc.goal_plan {
            if let Some(updated) = plan::reconcile(&doc.content, plan) {
                doc.goal_plan = Some(updated);
                doc.goal_plan_updated_at = Some(now);
                tracing::debug!(document_id = %doc.id, "Goal plan reconciled from checkbox edits");
            }
        }
        let strategy = self.strategy_for(doc);
        self.controller.dispatch(
            ControllerEvent::InsightsChanged {
                document: doc,
                strategy: &strategy,
                foreground_busy,
                pending_selection,
            },
            now,
        );
    }

    /// Drive this document's due automation timer. Call periodically (or when
    /// the scheduler's next deadline passes). Only the given document's run
    /// is fired; other documents' captured runs stay armed until their own
    /// tick comes around.
    pub async fn automation_tick(
        &mut self,
        doc: &mut Document,
        snapshots: &mut dyn SnapshotStore,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let decisions = self.controller.poll_document(&doc.id, now);
        for decision in decisions {
            match decision.action {
                AutomationAction::Debouncing => {}
                AutomationAction::Rejected { bucket, reason } => {
                    self.status.emit(
                        &doc.id,
                        OpStatus::Warning,
                        format!("automation declined ({} risk): {}", bucket.as_str(), reason),
                    );
                }
                AutomationAction::Execute {
                    auto_apply,
                    target_preference,
                    action_items,
                } => {
                    self.run_automation(doc, snapshots, auto_apply, target_preference, action_items)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn run_automation(
        &mut self,
        doc: &mut Document,
        snapshots: &mut dyn SnapshotStore,
        auto_apply: bool,
        target_preference: TargetPreference,
        action_items: Vec<String>,
    ) -> Result<()> {
        self.status
            .emit(&doc.id, OpStatus::Running, "automation executing");
        let target = doc.resolve_target(preference_target(target_preference));
        let user_prompt = format!(
            "Document ({}):\n{}\n\nPending action items:\n{}",
            doc.title,
            doc.target_content(target),
            action_items
                .iter()
                .map(|item| format!("- {}", item))
                .collect::<Vec<_>>()
                .join("\n")
        );

        self.automation_cancel.reset();
        let generated = self
            .generator
            .generate(PATCH_SYSTEM_PROMPT, &user_prompt, None, &self.automation_cancel)
            .await;
        let reply = match generated {
            Ok(reply) => reply,
            Err(GenerateError::Aborted) => {
                self.status
                    .emit(&doc.id, OpStatus::Warning, "automation interrupted");
                return Ok(());
            }
            Err(GenerateError::Failed(msg)) => {
                // Never retried automatically; the user can rerun manually.
                self.status.emit(
                    &doc.id,
                    OpStatus::Warning,
                    format!("automation failed, retry manually: {}", msg),
                );
                return Ok(());
            }
        };

        if auto_apply {
            let patches = parse_patch_reply(&reply, self.config.queue.max_patches_per_batch);
            let outcome = apply::apply_edit(
                doc,
                snapshots,
                reply.trim(),
                ApplyMode::UpdateBlock,
                target,
                &patches,
            )?;
            match outcome {
                ApplyOutcome::NoPatchesMatched => {
                    self.status.emit(
                        &doc.id,
                        OpStatus::Warning,
                        "automation produced no applicable patches",
                    );
                }
                ApplyOutcome::Applied { applied_ids, .. } => {
                    doc.push_execution_entry(GoalExecutionEntry::new(
                        EditTrigger::AutoExecute,
                        action_items.clone(),
                        format!("auto-applied {} patches", applied_ids.len().max(1)),
                    ));
                    self.status
                        .emit(&doc.id, OpStatus::Success, "automation applied an edit");
                }
            }
        } else {
            let title = action_items.first().cloned().unwrap_or_else(|| "automation".to_string());
            self.enqueue_reply(
                doc,
                &title,
                &reply,
                ApplyMode::UpdateBlock,
                target,
                EditTrigger::AutoExecute,
            )?;
            self.status.emit(
                &doc.id,
                OpStatus::Success,
                "automation preview ready for review",
            );
        }
        Ok(())
    }

    /// Generate (or regenerate) the document's goal plan and splice the
    /// rendered block into the content. An unusable reply never replaces the
    /// previous plan.
    pub async fn replan_goals(
        &mut self,
        doc: &mut Document,
        snapshots: &mut dyn SnapshotStore,
        trigger: EditTrigger,
    ) -> Result<bool> {
        self.status.emit(&doc.id, OpStatus::Running, "replanning goals");
        let user_prompt = format!(
            "Document ({}):\n{}\n\nExisting plan:\n{}",
            doc.title,
            doc.content,
            doc.goal_plan
                .as_ref()
                .and_then(|plan| serde_json::to_string(plan).ok())
                .unwrap_or_else(|| "none".to_string())
        );

        self.workflow_cancel.reset();
        let generated = self
            .generator
            .generate(PLAN_SYSTEM_PROMPT, &user_prompt, None, &self.workflow_cancel)
            .await;
        let reply = match generated {
            Ok(reply) => reply,
            Err(GenerateError::Aborted) => {
                self.status
                    .emit(&doc.id, OpStatus::Warning, "replanning interrupted");
                return Ok(false);
            }
            Err(GenerateError::Failed(msg)) => {
                self.status
                    .emit(&doc.id, OpStatus::Error, format!("replanning failed: {}", msg));
                return Ok(false);
            }
        };

        let Some(new_plan) = plan::parse_from_text(&reply) else {
            // Previous plan stays untouched; no partial plan is persisted.
            self.status
                .emit(&doc.id, OpStatus::Warning, "plan reply unusable, kept previous plan");
            return Ok(false);
        };

        snapshots.snapshot(doc);
        doc.content = plan::merge(&doc.content, &new_plan);
        let changed_sections = vec![
            format!("tasks:{}", new_plan.tasks.len()),
            format!("milestones:{}", new_plan.milestones.len()),
        ];
        let summary = new_plan.summary.clone();
        doc.goal_plan = Some(new_plan);
        doc.goal_plan_updated_at = Some(Utc::now());
        doc.push_execution_entry(GoalExecutionEntry::new(trigger, changed_sections, summary));
        self.status.emit(&doc.id, OpStatus::Success, "goal plan updated");
        Ok(true)
    }
}

/// Pull a patch batch out of a model reply that may wrap the JSON in prose
/// or a code fence.
fn parse_patch_reply(reply: &str, cap: usize) -> Vec<ParagraphPatch> {
    let trimmed = reply.trim();
    let candidate = if let Some(start) = trimmed.find('[') {
        let end = trimmed.rfind(']').unwrap_or(trimmed.len() - 1);
        if end > start {
            &trimmed[start..=end]
        } else {
            trimmed
        }
    } else {
        trimmed
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
        return Vec::new();
    };
    let mut batch = ParagraphPatch::parse_batch(&value);
    batch.truncate(cap);
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemorySnapshots;
    use crate::generate::ChunkFn;
    use crate::status::StatusEvent;
    use async_trait::async_trait;
    use chrono::Duration;

    struct CannedGenerator {
        reply: Result<String, GenerateError>,
    }

    #[async_trait]
    impl Generator for CannedGenerator {
        async fn generate(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _on_chunk: Option<ChunkFn<'_>>,
            _cancel: &CancelToken,
        ) -> Result<String, GenerateError> {
            self.reply.clone()
        }
    }

    fn pipeline_with_reply(
        reply: Result<String, GenerateError>,
    ) -> (EditPipeline, flume::Receiver<StatusEvent>) {
        let (tx, rx) = flume::unbounded();
        let pipeline = EditPipeline::new(
            PipelineConfig::default(),
            Arc::new(CannedGenerator { reply }),
            StatusSink::new(tx),
        );
        (pipeline, rx)
    }

    fn statuses(rx: &flume::Receiver<StatusEvent>) -> Vec<OpStatus> {
        rx.try_iter().map(|event| event.status).collect()
    }

    #[tokio::test]
    async fn instruction_produces_a_preview_candidate() {
        let (mut pipeline, rx) = pipeline_with_reply(Ok("<p>rewritten</p>".to_string()));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>original</p>".to_string();

        let id = pipeline
            .handle_instruction(&mut doc, "rewrite this", ApplyMode::Replace, EditTarget::Original, &[])
            .await
            .expect("instruction handled")
            .expect("preview created");

        let item = pipeline.queue().get(&id).expect("queued");
        assert_eq!(item.content, "<p>rewritten</p>");
        assert_eq!(pipeline.queue().active_id(), Some(id.as_str()));
        // Document untouched until the candidate is applied.
        assert_eq!(doc.content, "<p>original</p>");
        assert!(statuses(&rx).contains(&OpStatus::Success));
    }

    #[tokio::test]
    async fn patch_reply_becomes_a_patch_candidate_with_preview() {
        let reply = r#"Here you go:
[{"id": "p1", "action": "replace", "find": "original", "content": "<p>better</p>"}]"#;
        let (mut pipeline, _rx) = pipeline_with_reply(Ok(reply.to_string()));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>original</p><p>tail</p>".to_string();

        let id = pipeline
            .handle_instruction(
                &mut doc,
                "improve the first paragraph",
                ApplyMode::UpdateBlock,
                EditTarget::Original,
                &[],
            )
            .await
            .expect("handled")
            .expect("preview created");

        let item = pipeline.queue().get(&id).expect("queued");
        assert_eq!(item.patches.len(), 1);
        assert_eq!(item.content, "<p>better</p><p>tail</p>");
    }

    #[tokio::test]
    async fn aborted_generation_caches_one_retry() {
        let (mut pipeline, rx) = pipeline_with_reply(Err(GenerateError::Aborted));
        let mut doc = Document::new("doc-1");

        let result = pipeline
            .handle_instruction(&mut doc, "edit", ApplyMode::Replace, EditTarget::Original, &[])
            .await
            .expect("handled");
        assert!(result.is_none());
        assert!(pipeline.queue().is_empty());
        assert!(pipeline.has_pending_retry());
        assert!(statuses(&rx).contains(&OpStatus::Warning));
    }

    #[tokio::test]
    async fn apply_candidate_commits_and_logs() {
        let (mut pipeline, _rx) = pipeline_with_reply(Ok("<p>rewritten</p>".to_string()));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>original</p>".to_string();
        let mut snapshots = MemorySnapshots::new();

        let id = pipeline
            .handle_instruction(&mut doc, "rewrite", ApplyMode::Replace, EditTarget::Original, &[])
            .await
            .expect("handled")
            .expect("preview");
        let outcome = pipeline
            .apply_candidate(&mut doc, &mut snapshots, &id)
            .expect("applied")
            .expect("item existed");

        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
        assert_eq!(doc.content, "<p>rewritten</p>");
        assert_eq!(snapshots.len(), 1);
        assert!(pipeline.queue().is_empty());
        assert_eq!(doc.goal_execution_log.len(), 1);
    }

    #[tokio::test]
    async fn automation_auto_applies_patches_end_to_end() {
        let reply =
            r#"[{"id": "p1", "action": "replace", "find": "draft", "content": "<p>final</p>"}]"#;
        let (mut pipeline, rx) = pipeline_with_reply(Ok(reply.to_string()));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>draft</p>".to_string();
        doc.ai_action_items = vec!["总结并润色".to_string()];
        let mut strategy = AutomationStrategy::defaults(&pipeline.config.automation);
        strategy.execution_mode = crate::automation::ExecutionMode::AutoApply;
        doc.automation_strategy = Some(strategy);
        let mut snapshots = MemorySnapshots::new();

        let now = Utc::now();
        pipeline.document_changed(&mut doc, now, false, false);
        pipeline
            .automation_tick(&mut doc, &mut snapshots, now + Duration::milliseconds(70_000))
            .await
            .expect("tick");

        assert_eq!(doc.content, "<p>final</p>");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(doc.goal_execution_log.len(), 1);
        assert_eq!(doc.goal_execution_log[0].trigger, EditTrigger::AutoExecute);
        assert!(statuses(&rx).contains(&OpStatus::Success));
    }

    #[tokio::test]
    async fn automation_preview_mode_enqueues_instead_of_applying() {
        let reply =
            r#"[{"id": "p1", "action": "replace", "find": "draft", "content": "<p>final</p>"}]"#;
        let (mut pipeline, _rx) = pipeline_with_reply(Ok(reply.to_string()));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>draft</p>".to_string();
        doc.ai_action_items = vec!["总结文档".to_string()];
        let mut snapshots = MemorySnapshots::new();

        let now = Utc::now();
        pipeline.document_changed(&mut doc, now, false, false);
        pipeline
            .automation_tick(&mut doc, &mut snapshots, now + Duration::milliseconds(70_000))
            .await
            .expect("tick");

        // Preview mode: document untouched, candidate queued for review.
        assert_eq!(doc.content, "<p>draft</p>");
        assert!(snapshots.is_empty());
        assert_eq!(pipeline.queue().len(), 1);
        let item = pipeline.queue().items().first().expect("item");
        assert_eq!(item.trigger, EditTrigger::AutoExecute);
    }

    #[tokio::test]
    async fn tick_for_one_document_keeps_the_other_documents_run() {
        let reply =
            r#"[{"id": "p1", "action": "replace", "find": "draft", "content": "<p>final</p>"}]"#;
        let (mut pipeline, rx) = pipeline_with_reply(Ok(reply.to_string()));

        let mut strategy = AutomationStrategy::defaults(&pipeline.config.automation);
        strategy.execution_mode = crate::automation::ExecutionMode::AutoApply;
        let mut doc_a = Document::new("doc-a");
        doc_a.content = "<p>draft</p>".to_string();
        doc_a.ai_action_items = vec!["总结文档".to_string()];
        doc_a.automation_strategy = Some(strategy.clone());
        let mut doc_b = Document::new("doc-b");
        doc_b.content = "<p>draft</p>".to_string();
        doc_b.ai_action_items = vec!["总结文档".to_string()];
        doc_b.automation_strategy = Some(strategy);
        let mut snapshots_a = MemorySnapshots::new();
        let mut snapshots_b = MemorySnapshots::new();

        let now = Utc::now();
        pipeline.document_changed(&mut doc_a, now, false, false);
        pipeline.document_changed(&mut doc_b, now, false, false);
        let deadline = now + Duration::milliseconds(70_000);

        // Both windows share the deadline; the tick driven with doc A must
        // only consume doc A's run.
        pipeline
            .automation_tick(&mut doc_a, &mut snapshots_a, deadline)
            .await
            .expect("tick a");
        assert_eq!(doc_a.content, "<p>final</p>");
        assert_eq!(doc_b.content, "<p>draft</p>");
        assert!(snapshots_b.is_empty());

        // Doc B's run is still pending and fires on its own tick.
        pipeline
            .automation_tick(&mut doc_b, &mut snapshots_b, deadline)
            .await
            .expect("tick b");
        assert_eq!(doc_b.content, "<p>final</p>");
        assert_eq!(snapshots_b.len(), 1);
        assert_eq!(doc_b.goal_execution_log.len(), 1);

        let event_docs: Vec<String> = rx.try_iter().map(|event| event.document_id).collect();
        assert!(event_docs.iter().any(|id| id == "doc-a"));
        assert!(event_docs.iter().any(|id| id == "doc-b"));
    }

    #[tokio::test]
    async fn automation_failure_surfaces_warning_and_never_retries() {
        let (mut pipeline, rx) =
            pipeline_with_reply(Err(GenerateError::Failed("provider down".to_string())));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>draft</p>".to_string();
        doc.ai_action_items = vec!["总结文档".to_string()];
        let mut snapshots = MemorySnapshots::new();

        let now = Utc::now();
        pipeline.document_changed(&mut doc, now, false, false);
        pipeline
            .automation_tick(&mut doc, &mut snapshots, now + Duration::milliseconds(70_000))
            .await
            .expect("tick");

        assert_eq!(doc.content, "<p>draft</p>");
        assert!(statuses(&rx).contains(&OpStatus::Warning));
        // Same signature stays processed: no second window, no auto-retry.
        pipeline.document_changed(&mut doc, now + Duration::seconds(400), false, false);
        pipeline
            .automation_tick(&mut doc, &mut snapshots, now + Duration::seconds(500))
            .await
            .expect("tick");
        assert!(pipeline.queue().is_empty());
    }

    #[tokio::test]
    async fn replan_merges_plan_and_rejects_unusable_reply() {
        let reply = r#"{"summary": "Ship v1", "tasks": [{"title": "Write spec"}]}"#;
        let (mut pipeline, _rx) = pipeline_with_reply(Ok(reply.to_string()));
        let mut doc = Document::new("doc-1");
        doc.content = "<p>notes</p>".to_string();
        let mut snapshots = MemorySnapshots::new();

        let updated = pipeline
            .replan_goals(&mut doc, &mut snapshots, EditTrigger::ManualReplan)
            .await
            .expect("replan");
        assert!(updated);
        assert!(doc.content.starts_with("<section data-goal-plan=\"v1\">"));
        assert!(doc.content.ends_with("<p>notes</p>"));
        let plan = doc.goal_plan.clone().expect("plan stored");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(snapshots.len(), 1);

        // Unusable reply: previous plan and content untouched.
        let (mut failing, rx) = pipeline_with_reply(Ok("not json at all".to_string()));
        let before = doc.content.clone();
        let updated = failing
            .replan_goals(&mut doc, &mut snapshots, EditTrigger::AutoReplan)
            .await
            .expect("replan attempt");
        assert!(!updated);
        assert_eq!(doc.content, before);
        assert_eq!(doc.goal_plan.clone().expect("still there").tasks.len(), 1);
        assert!(statuses(&rx).contains(&OpStatus::Warning));
    }

    #[tokio::test]
    async fn document_changed_reconciles_checkbox_edits() {
        let (mut pipeline, _rx) = pipeline_with_reply(Ok(String::new()));
        let mut doc = Document::new("doc-1");
        let plan = plan::normalize(&serde_json::json!({
            "summary": "Ship",
            "tasks": [{"title": "Write spec"}]
        }))
        .expect("plan");
        doc.content = plan::merge("", &plan);
        doc.goal_plan = Some(plan);

        // User checks the task's box in the raw markup.
        doc.content = doc.content.replacen(
            "<input type=\"checkbox\">",
            "<input type=\"checkbox\" checked=\"\">",
            1,
        );
        pipeline.document_changed(&mut doc, Utc::now(), false, false);

        let plan = doc.goal_plan.clone().expect("plan");
        assert_eq!(plan.tasks[0].status, crate::plan::TaskStatus::Done);
    }
}
