//! Goal plan normalization, rendering, idempotent merge and checkbox
//! reconciliation.
//!
//! The planner model returns loose JSON; `normalize` clamps it into a usable
//! plan or rejects it wholesale. The rendered block lives in a uniquely
//! tagged container so re-merging the same plan replaces it in place instead
//! of stacking duplicates. Users edit the rendered markup directly, so
//! reconciliation matches task-list items by position, not by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::html;

pub const PLAN_VERSION: &str = "v1";
pub const MAX_MILESTONES: usize = 8;
pub const MAX_TASKS: usize = 20;
pub const MAX_NEXT_ACTIONS: usize = 3;
pub const MAX_RISKS: usize = 6;

const CONTAINER_MARKER: &str = "data-goal-plan=\"v1\"";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalPlan {
    pub version: String,
    pub summary: String,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub next_actions: Vec<NextAction>,
    #[serde(default)]
    pub risks: Vec<PlanRisk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Planned,
    Active,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub milestone_id: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    P0,
    #[default]
    P1,
    P2,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::P0 => "p0",
            TaskPriority::P1 => "p1",
            TaskPriority::P2 => "p2",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "p0" => Some(TaskPriority::P0),
            "p1" => Some(TaskPriority::P1),
            "p2" => Some(TaskPriority::P2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    Doing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextAction {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRisk {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub level: PlanRiskLevel,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Validate and clamp an AI-returned plan. Items missing a usable title are
/// dropped; the whole plan is rejected only when it is unusable: no summary,
/// or both `tasks` and `next_actions` empty after cleaning.
pub fn normalize(raw: &Value) -> Option<GoalPlan> {
    let obj = raw.as_object()?;
    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();

    let milestones = collect_items(obj.get("milestones"), MAX_MILESTONES, |item| {
        Some(Milestone {
            id: id_or_new(item),
            title: required_title(item)?,
            due: opt_string(item, "due"),
            status: parse_enum(item, "status"),
        })
    });
    let tasks = collect_items(obj.get("tasks"), MAX_TASKS, |item| {
        Some(Task {
            id: id_or_new(item),
            title: required_title(item)?,
            priority: item
                .get("priority")
                .and_then(Value::as_str)
                .and_then(TaskPriority::parse)
                .unwrap_or_default(),
            milestone_id: opt_string(item, "milestoneId").or_else(|| opt_string(item, "milestone_id")),
            status: parse_enum(item, "status"),
            owner: opt_string(item, "owner"),
        })
    });
    let next_actions = collect_items(obj.get("nextActions").or_else(|| obj.get("next_actions")), MAX_NEXT_ACTIONS, |item| {
        Some(NextAction {
            id: id_or_new(item),
            title: required_title(item)?,
            reason: opt_string(item, "reason").unwrap_or_default(),
        })
    });
    let risks = collect_items(obj.get("risks"), MAX_RISKS, |item| {
        Some(PlanRisk {
            id: id_or_new(item),
            title: required_title(item)?,
            level: parse_enum(item, "level"),
            mitigation: opt_string(item, "mitigation"),
        })
    });

    if tasks.is_empty() && next_actions.is_empty() {
        tracing::debug!("Plan rejected: no tasks and no next actions");
        return None;
    }

    Some(GoalPlan {
        version: PLAN_VERSION.to_string(),
        summary,
        milestones,
        tasks,
        next_actions,
        risks,
    })
}

/// Pull a plan out of raw model text: accepts bare JSON or a fenced block.
pub fn parse_from_text(text: &str) -> Option<GoalPlan> {
    let candidate = extract_json(text)?;
    let value: Value = serde_json::from_str(&candidate).ok()?;
    normalize(&value)
}

fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if let Some(fenced) = trimmed.find("```") {
        let after = &trimmed[fenced + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(close) = after.find("```") {
            return Some(after[..close].trim().to_string());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].to_string())
}

fn collect_items<T>(
    raw: Option<&Value>,
    cap: usize,
    mut build: impl FnMut(&Value) -> Option<T>,
) -> Vec<T> {
    raw.and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| build(item)).take(cap).collect())
        .unwrap_or_default()
}

fn required_title(item: &Value) -> Option<String> {
    item.get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn id_or_new(item: &Value) -> String {
    item.get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn opt_string(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_enum<T: Default + serde::de::DeserializeOwned>(item: &Value, key: &str) -> T {
    item.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Deterministic rendering into the tagged container. Independent of any
/// prior document content.
pub fn render(plan: &GoalPlan) -> String {
    let mut out = String::new();
    out.push_str("<section data-goal-plan=\"v1\">");
    out.push_str("<h2>Goal plan</h2>");
    out.push_str(&format!("<p>{}</p>", escape_html(&plan.summary)));

    if !plan.milestones.is_empty() {
        out.push_str("<h3>Milestones</h3><ul data-plan-milestones=\"\">");
        for milestone in &plan.milestones {
            let due = milestone
                .due
                .as_deref()
                .map(|d| format!(" (due {})", escape_html(d)))
                .unwrap_or_default();
            let status = match milestone.status {
                MilestoneStatus::Planned => "planned",
                MilestoneStatus::Active => "active",
                MilestoneStatus::Done => "done",
            };
            out.push_str(&format!(
                "<li>[{}] {}{}</li>",
                status,
                escape_html(&milestone.title),
                due
            ));
        }
        out.push_str("</ul>");
    }

    if !plan.tasks.is_empty() {
        out.push_str("<h3>Tasks</h3><ul data-plan-tasks=\"\">");
        for task in &plan.tasks {
            let checked = if task.status == TaskStatus::Done {
                " checked=\"\""
            } else {
                ""
            };
            out.push_str(&format!(
                "<li data-task=\"{}\"><input type=\"checkbox\"{}> {} {}</li>",
                escape_html(&task.id),
                checked,
                task.priority.as_str().to_ascii_uppercase(),
                escape_html(&task.title)
            ));
        }
        out.push_str("</ul>");
    }

    if !plan.next_actions.is_empty() {
        out.push_str("<h3>Next actions</h3><ol data-plan-next=\"\">");
        for action in &plan.next_actions {
            if action.reason.is_empty() {
                out.push_str(&format!("<li>{}</li>", escape_html(&action.title)));
            } else {
                out.push_str(&format!(
                    "<li>{} ({})</li>",
                    escape_html(&action.title),
                    escape_html(&action.reason)
                ));
            }
        }
        out.push_str("</ol>");
    }

    if !plan.risks.is_empty() {
        out.push_str("<h3>Risks</h3><ul data-plan-risks=\"\">");
        for risk in &plan.risks {
            let level = match risk.level {
                PlanRiskLevel::Low => "low",
                PlanRiskLevel::Medium => "medium",
                PlanRiskLevel::High => "high",
            };
            let mitigation = risk
                .mitigation
                .as_deref()
                .map(|m| format!(": {}", escape_html(m)))
                .unwrap_or_default();
            out.push_str(&format!(
                "<li>[{}] {}{}</li>",
                level,
                escape_html(&risk.title),
                mitigation
            ));
        }
        out.push_str("</ul>");
    }

    out.push_str("</section>");
    out
}

/// Byte range of the existing plan container, if any.
fn container_span(existing: &str) -> Option<(usize, usize)> {
    let marker = existing.find(CONTAINER_MARKER)?;
    let start = existing[..marker].rfind("<section")?;
    // Find the matching close, tolerating nested sections.
    let mut depth = 0usize;
    let mut i = start;
    while i < existing.len() {
        let rest = &existing[i..];
        if rest.starts_with("<section") {
            depth += 1;
            i += "<section".len();
        } else if rest.starts_with("</section>") {
            depth -= 1;
            i += "</section>".len();
            if depth == 0 {
                return Some((start, i));
            }
        } else {
            i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    None
}

/// Splice the rendered plan into the document HTML.
///
/// Idempotent: an existing container is replaced at the same tree position;
/// otherwise the block is inserted at the very start of the document.
pub fn merge(existing: &str, plan: &GoalPlan) -> String {
    let rendered = render(plan);
    match container_span(existing) {
        Some((start, end)) => {
            let mut out = String::with_capacity(existing.len() + rendered.len());
            out.push_str(&existing[..start]);
            out.push_str(&rendered);
            out.push_str(&existing[end..]);
            out
        }
        None => {
            if existing.is_empty() {
                rendered
            } else {
                format!("{}{}", rendered, existing)
            }
        }
    }
}

/// Fold user edits to the rendered task list back into the plan.
///
/// Matching is positional: the user edits raw markup, so ids cannot be
/// trusted. A manually checked box forces `done`; unchecking a done task
/// reverts it to `todo`. Edited leading `P0`/`P1`/`P2` tokens and titles are
/// taken over. Only the first `min(parsed, plan)` tasks are reconciled.
///
/// Returns `None` when nothing changed.
pub fn reconcile(existing: &str, plan: &GoalPlan) -> Option<GoalPlan> {
    let (start, end) = container_span(existing)?;
    let container = &existing[start..end];
    let blocks = html::segment(container).ok()?;
    let checkbox = regex_lite::Regex::new(r"<input[^>]*\bchecked").ok()?;

    let parsed: Vec<(bool, Option<TaskPriority>, String)> = blocks
        .iter()
        .filter(|b| b.tag == "li" && b.outer(container).contains("data-task"))
        .map(|b| {
            let checked = checkbox.is_match(b.outer(container));
            let text = b.text.clone();
            let (priority, title) = match text.split_once(' ') {
                Some((head, tail)) if TaskPriority::parse(head).is_some() => {
                    (TaskPriority::parse(head), tail.trim().to_string())
                }
                _ => (None, text),
            };
            (checked, priority, title)
        })
        .collect();

    let mut updated = plan.clone();
    let mut changed = false;
    for (task, (checked, priority, title)) in updated.tasks.iter_mut().zip(parsed.iter()) {
        if *checked && task.status != TaskStatus::Done {
            task.status = TaskStatus::Done;
            changed = true;
        } else if !*checked && task.status == TaskStatus::Done {
            task.status = TaskStatus::Todo;
            changed = true;
        }
        if let Some(priority) = priority {
            if task.priority != *priority {
                task.priority = *priority;
                changed = true;
            }
        }
        if !title.is_empty() && *title != task.title {
            task.title = title.clone();
            changed = true;
        }
    }

    changed.then_some(updated)
}
