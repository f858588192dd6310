//! Skill selection for chat-style entry points.
//!
//! Primary path: a time-boxed LLM call that returns strict JSON. When the
//! model is slow, down, or returns garbage, a deterministic character-bigram
//! similarity fallback takes over so routing never blocks an edit. The
//! goal-breakdown skill is deliberately suppressed absent a strong planning
//! signal — it over-triggers on generic wording.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RouterConfig;
use crate::generate::{CancelToken, Generator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillRisk {
    #[default]
    Low,
    Medium,
    High,
}

/// A reusable instruction template from the user's catalog. Immutable here;
/// CRUD and storage live outside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub cadence: String,
    #[serde(default)]
    pub risk: SkillRisk,
}

impl Skill {
    /// Concatenated profile the similarity scorer matches against.
    fn profile(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.name, self.description, self.prompt, self.scope, self.output, self.cadence
        )
    }

    fn is_goal_breakdown(&self) -> bool {
        let lowered = format!("{} {}", self.name, self.description).to_lowercase();
        lowered.contains("goal breakdown")
            || lowered.contains("break down goal")
            || lowered.contains("目标拆解")
            || lowered.contains("目标分解")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteOutcome {
    pub skills: Vec<Skill>,
    pub auto_search: bool,
}

#[derive(Debug, Deserialize)]
struct RouterReply {
    #[serde(default)]
    selected_skill_ids: Vec<String>,
    #[serde(default)]
    enable_web_search: bool,
}

/// Phrases that signal the user genuinely wants planning, not just happens
/// to use broad wording.
const PLANNING_CUES: &[&str] = &[
    "plan", "milestone", "roadmap", "break down", "break this down", "拆解", "分解", "规划",
    "计划", "里程碑", "排期",
];

/// Requests resembling this profile get web search switched on.
const FRESH_INFO_PROFILE: &str = "latest news today current now price stock weather release \
     update recent 2025 最新 新闻 今天 现在 实时 行情 近期 发布";

/// Character-bigram Jaccard similarity over lowercased, whitespace-stripped
/// text. Cheap, language-agnostic, good enough for a guardrail.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let grams = |s: &str| -> HashSet<(char, char)> {
        let chars: Vec<char> = s
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let a = grams(a);
    let b = grams(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Select zero-to-few applicable skills for a free-text request.
pub async fn route(
    generator: &dyn Generator,
    config: &RouterConfig,
    text: &str,
    catalog: &[Skill],
) -> RouteOutcome {
    if catalog.is_empty() || text.trim().is_empty() {
        return RouteOutcome::default();
    }

    let llm_reply = llm_route(generator, config, text, catalog).await;
    let llm_search = llm_reply.as_ref().map(|r| r.enable_web_search).unwrap_or(false);

    let mut outcome = match llm_reply {
        Some(reply) if !reply.selected_skill_ids.is_empty() => {
            let skills: Vec<Skill> = reply
                .selected_skill_ids
                .iter()
                .filter_map(|id| catalog.iter().find(|s| &s.id == id || &s.name == id))
                .take(config.max_selected)
                .cloned()
                .collect();
            if skills.is_empty() {
                lexical_route(config, text, catalog)
            } else {
                RouteOutcome {
                    skills,
                    auto_search: false,
                }
            }
        }
        _ => lexical_route(config, text, catalog),
    };

    suppress_goal_breakdown(config, text, &mut outcome);

    outcome.auto_search =
        llm_search || bigram_similarity(text, FRESH_INFO_PROFILE) >= config.web_search_floor;
    outcome
}

async fn llm_route(
    generator: &dyn Generator,
    config: &RouterConfig,
    text: &str,
    catalog: &[Skill],
) -> Option<RouterReply> {
    let mut listing = String::new();
    for skill in catalog {
        listing.push_str(&format!(
            "- id: {} | name: {} | {}\n",
            skill.id, skill.name, skill.description
        ));
    }
    let system_prompt = "You route user requests to reusable editing skills. \
         Respond with ONLY a JSON object: \
         {\"selected_skill_ids\": [\"...\"], \"enable_web_search\": false}. \
         Select at most 3 skills; select none unless clearly applicable.";
    let user_prompt = format!("Available skills:\n{}\nUser request:\n{}", listing, text);

    let cancel = CancelToken::new();
    let call = generator.generate(system_prompt, &user_prompt, None, &cancel);
    let reply = match tokio::time::timeout(Duration::from_millis(config.llm_timeout_ms), call).await
    {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            tracing::debug!("Skill router LLM call failed, using fallback: {}", e);
            cancel.cancel();
            return None;
        }
        Err(_) => {
            tracing::debug!("Skill router LLM call timed out, using fallback");
            cancel.cancel();
            return None;
        }
    };

    let json = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match serde_json::from_str::<RouterReply>(json) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!("Skill router reply unparseable, using fallback: {}", e);
            None
        }
    }
}

/// Deterministic fallback: similarity against each skill's profile with an
/// absolute floor and a relative floor against the best score.
fn lexical_route(config: &RouterConfig, text: &str, catalog: &[Skill]) -> RouteOutcome {
    let mut scored: Vec<(f64, &Skill)> = catalog
        .iter()
        .map(|skill| (bigram_similarity(text, &skill.profile()), skill))
        .filter(|(score, _)| *score >= config.similarity_floor)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let Some(top) = scored.first().map(|(score, _)| *score) else {
        return RouteOutcome::default();
    };
    let skills = scored
        .iter()
        .filter(|(score, _)| *score >= top * config.relative_floor)
        .take(config.max_selected)
        .map(|(_, skill)| (*skill).clone())
        .collect();
    RouteOutcome {
        skills,
        auto_search: false,
    }
}

/// Drop the goal-breakdown skill unless the request carries an explicit
/// planning cue, or it clears a stricter similarity bar than the general
/// selection did.
fn suppress_goal_breakdown(config: &RouterConfig, text: &str, outcome: &mut RouteOutcome) {
    if !outcome.skills.iter().any(|s| s.is_goal_breakdown()) {
        return;
    }
    let lowered = text.to_lowercase();
    if PLANNING_CUES.iter().any(|cue| lowered.contains(cue)) {
        return;
    }

    let scores: Vec<(bool, f64)> = outcome
        .skills
        .iter()
        .map(|skill| (skill.is_goal_breakdown(), bigram_similarity(text, &skill.profile())))
        .collect();
    let top = scores.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
    let co_selected = outcome.skills.len() > 1;

    outcome.skills = outcome
        .skills
        .iter()
        .zip(scores.iter())
        .filter(|(_, (is_goal, score))| {
            if !is_goal {
                return true;
            }
            let keep = if co_selected {
                *score >= top * config.goal_strict_relative
            } else {
                *score >= config.goal_strict_absolute
            };
            if !keep {
                tracing::debug!("Suppressing goal-breakdown skill: no planning signal");
            }
            keep
        })
        .map(|(skill, _)| skill.clone())
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{ChunkFn, GenerateError};
    use async_trait::async_trait;

    struct CannedGenerator {
        reply: Result<String, GenerateError>,
        delay_ms: u64,
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
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.reply.clone()
        }
    }

    fn skill(id: &str, name: &str, description: &str) -> Skill {
        Skill {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            prompt: description.to_string(),
            scope: String::new(),
            output: String::new(),
            cadence: String::new(),
            risk: SkillRisk::Low,
        }
    }

    fn catalog() -> Vec<Skill> {
        vec![
            skill(
                "sum",
                "Summarize document",
                "Summarize the document into key points and a short abstract",
            ),
            skill(
                "trans",
                "Translate document",
                "Translate the document content into another language",
            ),
            skill(
                "goal",
                "Goal breakdown",
                "Break down goals into milestones tasks and next actions",
            ),
        ]
    }

    #[test]
    fn bigram_similarity_orders_related_text_first() {
        let request = "please summarize this document into key points";
        let to_summary = bigram_similarity(request, "summarize the document into key points");
        let to_translate = bigram_similarity(request, "translate the content into French");
        assert!(to_summary > to_translate);
        assert_eq!(bigram_similarity("", "anything"), 0.0);
    }

    #[tokio::test]
    async fn llm_selection_wins_when_parseable() {
        let generator = CannedGenerator {
            reply: Ok(r#"{"selected_skill_ids": ["trans"], "enable_web_search": true}"#.to_string()),
            delay_ms: 0,
        };
        let outcome = route(
            &generator,
            &RouterConfig::default(),
            "把这篇文档翻译成英文",
            &catalog(),
        )
        .await;
        assert_eq!(outcome.skills.len(), 1);
        assert_eq!(outcome.skills[0].id, "trans");
        assert!(outcome.auto_search);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_lexical_routing() {
        let mut config = RouterConfig::default();
        config.llm_timeout_ms = 20;
        let generator = CannedGenerator {
            reply: Ok(r#"{"selected_skill_ids": ["trans"]}"#.to_string()),
            delay_ms: 200,
        };
        let outcome = route(
            &generator,
            &config,
            "summarize this document into key points please",
            &catalog(),
        )
        .await;
        assert!(!outcome.skills.is_empty());
        assert_eq!(outcome.skills[0].id, "sum");
    }

    #[tokio::test]
    async fn garbage_reply_falls_back_and_unrelated_text_selects_nothing() {
        let generator = CannedGenerator {
            reply: Ok("sorry, I cannot help with that".to_string()),
            delay_ms: 0,
        };
        let outcome = route(
            &generator,
            &RouterConfig::default(),
            "zzzz qqqq xxxx",
            &catalog(),
        )
        .await;
        assert!(outcome.skills.is_empty());
    }

    #[tokio::test]
    async fn goal_breakdown_suppressed_without_planning_cue() {
        let generator = CannedGenerator {
            reply: Ok(r#"{"selected_skill_ids": ["goal"]}"#.to_string()),
            delay_ms: 0,
        };
        // Generic wording, no planning cue: the over-triggering skill is cut.
        let outcome = route(
            &generator,
            &RouterConfig::default(),
            "help me make this document better somehow",
            &catalog(),
        )
        .await;
        assert!(outcome.skills.is_empty());
    }

    #[tokio::test]
    async fn goal_breakdown_kept_with_explicit_planning_cue() {
        let generator = CannedGenerator {
            reply: Ok(r#"{"selected_skill_ids": ["goal"]}"#.to_string()),
            delay_ms: 0,
        };
        let outcome = route(
            &generator,
            &RouterConfig::default(),
            "break down this goal into a plan with milestones",
            &catalog(),
        )
        .await;
        assert_eq!(outcome.skills.len(), 1);
        assert_eq!(outcome.skills[0].id, "goal");
    }

    #[tokio::test]
    async fn fresh_information_request_enables_web_search() {
        let generator = CannedGenerator {
            reply: Err(GenerateError::Failed("provider down".to_string())),
            delay_ms: 0,
        };
        let outcome = route(
            &generator,
            &RouterConfig::default(),
            "what is the latest news today about the current stock price",
            &catalog(),
        )
        .await;
        assert!(outcome.auto_search);
    }
}
