//! Risk scoring for unattended edits.
//!
//! Pending action items are free text (often Chinese, often vague), so the
//! classifier is a bilingual keyword table, not a model call: automation must
//! be able to refuse an action without spending a generation on it.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditCategory {
    Summarize,
    Translate,
    Polish,
    Expand,
    Write,
    Template,
    Organize,
    Format,
}

impl EditCategory {
    /// Categories whose output tends to restructure large parts of the
    /// document rather than touch it locally.
    pub fn is_heavy_rewrite(self) -> bool {
        matches!(
            self,
            EditCategory::Write | EditCategory::Template | EditCategory::Organize | EditCategory::Format
        )
    }
}

const CATEGORY_KEYWORDS: &[(EditCategory, &[&str])] = &[
    (
        EditCategory::Summarize,
        &["summar", "tl;dr", "总结", "概括", "摘要", "提炼"],
    ),
    (
        EditCategory::Translate,
        &["translat", "翻译", "译成", "译为", "英译", "中译"],
    ),
    (
        EditCategory::Polish,
        &["polish", "improve", "refine", "润色", "优化", "改进"],
    ),
    (
        EditCategory::Expand,
        &["expand", "elaborate", "continue writing", "扩写", "扩充", "续写"],
    ),
    (
        EditCategory::Write,
        &["write", "draft", "rewrite", "compose", "撰写", "编写", "重写", "起草"],
    ),
    (EditCategory::Template, &["template", "boilerplate", "模板", "套用"]),
    (
        EditCategory::Organize,
        &["organize", "restructure", "outline", "整理", "梳理", "归纳"],
    ),
    (EditCategory::Format, &["format", "layout", "排版", "格式化", "格式调整"]),
];

const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "delete", "remove all", "clear", "wipe", "erase", "overwrite", "discard", "删除", "清空",
    "清除", "抹掉", "覆盖", "全部移除",
];

/// Map one action item to zero or more edit categories.
pub fn classify(item: &str) -> Vec<EditCategory> {
    let lowered = item.to_lowercase();
    let mut categories = Vec::new();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            categories.push(*category);
        }
    }
    categories
}

pub fn is_destructive(item: &str) -> bool {
    let lowered = item.to_lowercase();
    DESTRUCTIVE_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskBucket::Low => "low",
            RiskBucket::Medium => "medium",
            RiskBucket::High => "high",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u32,
    pub bucket: RiskBucket,
    /// True when at least one item mapped to a known category. A batch where
    /// nothing is recognized is never executed unattended.
    pub any_recognized: bool,
    pub categories: Vec<EditCategory>,
}

/// Score a batch of pending action items.
pub fn assess(items: &[String], config: &RiskConfig) -> RiskAssessment {
    let mut score = 0u32;
    let mut any_recognized = false;
    let mut categories = Vec::new();

    for item in items {
        if is_destructive(item) {
            score += config.destructive_weight;
        }
        let item_categories = classify(item);
        if item_categories.is_empty() {
            score += config.unrecognized_weight;
        } else {
            any_recognized = true;
            if item_categories.contains(&EditCategory::Translate) {
                score += config.translation_weight;
            }
            if item_categories.iter().any(|c| c.is_heavy_rewrite()) {
                score += config.heavy_rewrite_weight;
            }
            categories.extend(item_categories);
        }
    }

    let bucket = if score < config.medium_at {
        RiskBucket::Low
    } else if score < config.high_at {
        RiskBucket::Medium
    } else {
        RiskBucket::High
    };

    RiskAssessment {
        score,
        bucket,
        any_recognized,
        categories,
    }
}
