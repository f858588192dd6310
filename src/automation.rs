//! Risk-gated, idle-triggered automation.
//!
//! The controller is an explicit state machine with a single
//! `dispatch(event, now)` entry point, so the debounce/cooldown/risk-gate
//! interplay is unit-testable without any rendering surface or real clock.
//! Generation itself happens outside: the controller only decides whether to
//! do nothing, queue a preview, or auto-apply.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AutomationConfig, RiskConfig};
use crate::document::Document;
use crate::risk::{self, RiskBucket};
use crate::scheduler::{Scheduler, TimerKey};

pub const DEBOUNCE_CONCERN: &str = "automation_debounce";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Preview,
    AutoApply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPreference {
    Original,
    Translated,
    #[default]
    FollowSelector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationStrategy {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub target_preference: TargetPreference,
    #[serde(default = "default_risk_tolerance")]
    pub risk_tolerance: RiskBucket,
    #[serde(default)]
    pub idle_ms: u64,
    #[serde(default)]
    pub max_items: usize,
}

fn default_risk_tolerance() -> RiskBucket {
    RiskBucket::Low
}

impl AutomationStrategy {
    pub fn defaults(config: &AutomationConfig) -> Self {
        Self {
            execution_mode: ExecutionMode::Preview,
            target_preference: TargetPreference::FollowSelector,
            risk_tolerance: default_risk_tolerance(),
            idle_ms: config.default_idle_ms,
            max_items: config.default_max_items,
        }
    }

    /// Tolerant parse of an externally stored strategy. Type-invalid fields
    /// fall back to defaults; the result is then clamped.
    pub fn from_value(raw: &Value, config: &AutomationConfig, has_translated: bool) -> Self {
        let mut strategy: AutomationStrategy = serde_json::from_value(raw.clone())
            .unwrap_or_else(|_| Self::defaults(config));
        strategy.normalize(config, has_translated);
        strategy
    }

    /// Clamp out-of-range fields and coerce an illegal translated preference.
    /// Run on every load and update.
    pub fn normalize(&mut self, config: &AutomationConfig, has_translated: bool) {
        if self.idle_ms == 0 {
            self.idle_ms = config.default_idle_ms;
        }
        self.idle_ms = self.idle_ms.clamp(config.idle_ms_min, config.idle_ms_max);
        if self.max_items == 0 {
            self.max_items = config.default_max_items;
        }
        self.max_items = self.max_items.clamp(1, config.max_items_cap);
        if self.target_preference == TargetPreference::Translated && !has_translated {
            self.target_preference = TargetPreference::FollowSelector;
        }
    }

    fn fingerprint<H: Hasher>(&self, hasher: &mut H) {
        (self.execution_mode as u8).hash(hasher);
        (self.target_preference as u8).hash(hasher);
        self.risk_tolerance.as_str().hash(hasher);
        self.idle_ms.hash(hasher);
        self.max_items.hash(hasher);
    }
}

/// Hash of the top-N pending action items plus the plan/settings fingerprint.
/// Only change detection is needed, not collision resistance.
pub fn insight_signature(doc: &Document, strategy: &AutomationStrategy) -> u64 {
    let mut hasher = DefaultHasher::new();
    for item in doc.ai_action_items.iter().take(strategy.max_items) {
        item.hash(&mut hasher);
    }
    if let Some(at) = doc.goal_plan_updated_at {
        at.timestamp_millis().hash(&mut hasher);
    }
    strategy.fingerprint(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub enum ControllerEvent<'a> {
    /// Content-derived insight state may have changed; re-evaluate whether a
    /// debounce window should be (re)started.
    InsightsChanged {
        document: &'a Document,
        strategy: &'a AutomationStrategy,
        foreground_busy: bool,
        pending_selection: bool,
    },
    /// Clock tick from the driver; fires due debounce timers.
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationDecision {
    pub document_id: String,
    pub action: AutomationAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutomationAction {
    /// Debounce window (re)started; nothing to do yet.
    Debouncing,
    /// The gate declined to act. Expected, not an error.
    Rejected { bucket: RiskBucket, reason: String },
    /// Run generation for these items.
    Execute {
        auto_apply: bool,
        target_preference: TargetPreference,
        action_items: Vec<String>,
    },
}

#[derive(Debug, Clone)]
struct PendingRun {
    signature: u64,
    action_items: Vec<String>,
    strategy: AutomationStrategy,
}

/// Per-document debounce/cooldown/risk bookkeeping.
#[derive(Debug)]
pub struct AutomationController {
    automation: AutomationConfig,
    risk: RiskConfig,
    scheduler: Scheduler,
    pending: HashMap<String, PendingRun>,
    last_processed: HashMap<String, u64>,
    last_fired_at: HashMap<String, DateTime<Utc>>,
}

impl AutomationController {
    pub fn new(automation: AutomationConfig, risk: RiskConfig) -> Self {
        Self {
            automation,
            risk,
            scheduler: Scheduler::new(),
            pending: HashMap::new(),
            last_processed: HashMap::new(),
            last_fired_at: HashMap::new(),
        }
    }

    pub fn is_debouncing(&self, document_id: &str) -> bool {
        self.scheduler
            .is_armed(&TimerKey::new(document_id, DEBOUNCE_CONCERN))
    }

    /// Single entry point for the state machine.
    pub fn dispatch(&mut self, event: ControllerEvent<'_>, now: DateTime<Utc>) -> Vec<AutomationDecision> {
        match event {
            ControllerEvent::InsightsChanged {
                document,
                strategy,
                foreground_busy,
                pending_selection,
            } => self
                .on_insights_changed(document, strategy, foreground_busy, pending_selection, now)
                .into_iter()
                .collect(),
            ControllerEvent::Tick => self.on_tick(now),
        }
    }

    fn on_insights_changed(
        &mut self,
        doc: &Document,
        strategy: &AutomationStrategy,
        foreground_busy: bool,
        pending_selection: bool,
        now: DateTime<Utc>,
    ) -> Option<AutomationDecision> {
        let key = TimerKey::new(doc.id.clone(), DEBOUNCE_CONCERN);

        if !self.automation.enabled || foreground_busy || pending_selection {
            // No pending automation decision while the user (or another AI
            // operation) owns the document.
            self.scheduler.cancel(&key);
            self.pending.remove(&doc.id);
            return None;
        }

        let signature = insight_signature(doc, strategy);
        if self.last_processed.get(&doc.id) == Some(&signature) {
            self.scheduler.cancel(&key);
            self.pending.remove(&doc.id);
            return None;
        }
        if let Some(fired_at) = self.last_fired_at.get(&doc.id) {
            let cooldown = Duration::seconds(self.automation.cooldown_secs as i64);
            if now - *fired_at < cooldown {
                return None;
            }
        }
        if doc.ai_action_items.is_empty() {
            return None;
        }
        // Redundant notification carrying the signature already captured:
        // keep the running deadline instead of sliding it.
        if self.scheduler.is_armed(&key) {
            if let Some(pending) = self.pending.get(&doc.id) {
                if pending.signature == signature {
                    return None;
                }
            }
        }

        // Trailing debounce: a further qualifying change replaces both the
        // deadline and the captured run.
        self.scheduler.arm(key, strategy.idle_ms, now);
        self.pending.insert(
            doc.id.clone(),
            PendingRun {
                signature,
                action_items: doc
                    .ai_action_items
                    .iter()
                    .take(strategy.max_items)
                    .cloned()
                    .collect(),
                strategy: strategy.clone(),
            },
        );
        Some(AutomationDecision {
            document_id: doc.id.clone(),
            action: AutomationAction::Debouncing,
        })
    }

    fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<AutomationDecision> {
        let due = self.scheduler.due(now);
        self.gate_due(due, now)
    }

    /// Fire only the given document's due debounce timer.
    ///
    /// A driver working on one document at a time must use this instead of
    /// [`ControllerEvent::Tick`]: a global tick consumes every due run, and a
    /// run popped for a document the driver is not holding would be lost.
    pub fn poll_document(&mut self, document_id: &str, now: DateTime<Utc>) -> Vec<AutomationDecision> {
        let due = self.scheduler.due_for(document_id, now);
        self.gate_due(due, now)
    }

    fn gate_due(&mut self, keys: Vec<TimerKey>, now: DateTime<Utc>) -> Vec<AutomationDecision> {
        let mut decisions = Vec::new();
        for key in keys {
            if key.concern != DEBOUNCE_CONCERN {
                continue;
            }
            let Some(run) = self.pending.remove(&key.document_id) else {
                continue;
            };
            decisions.push(self.gate(key.document_id, run, now));
        }
        decisions
    }

    /// Risk-score the captured run and either reject or hand it to the
    /// executor. Either way the signature is marked processed so the same
    /// input cannot re-trigger.
    fn gate(&mut self, document_id: String, run: PendingRun, now: DateTime<Utc>) -> AutomationDecision {
        self.last_processed.insert(document_id.clone(), run.signature);

        let assessment = risk::assess(&run.action_items, &self.risk);
        if !assessment.any_recognized {
            tracing::info!(document_id = %document_id, "Automation rejected: no recognized edit category");
            return AutomationDecision {
                document_id,
                action: AutomationAction::Rejected {
                    bucket: assessment.bucket,
                    reason: "no recognized edit category in pending items".to_string(),
                },
            };
        }
        if assessment.bucket > run.strategy.risk_tolerance {
            tracing::info!(
                document_id = %document_id,
                bucket = assessment.bucket.as_str(),
                tolerance = run.strategy.risk_tolerance.as_str(),
                "Automation rejected by risk gate"
            );
            return AutomationDecision {
                document_id,
                action: AutomationAction::Rejected {
                    bucket: assessment.bucket,
                    reason: format!(
                        "risk {} exceeds tolerance {}",
                        assessment.bucket.as_str(),
                        run.strategy.risk_tolerance.as_str()
                    ),
                },
            };
        }

        // Start the cooldown at decision time: a failed generation must not
        // re-trigger on the same input either.
        self.last_fired_at.insert(document_id.clone(), now);
        AutomationDecision {
            document_id,
            action: AutomationAction::Execute {
                auto_apply: run.strategy.execution_mode == ExecutionMode::AutoApply,
                target_preference: run.strategy.target_preference,
                action_items: run.action_items,
            },
        }
    }
}
