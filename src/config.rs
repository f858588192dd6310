//! Pipeline tuning knobs.
//!
//! The risk weights, similarity cutoffs and timing windows in here are
//! empirically tuned values carried over from production telemetry, not
//! derived constants. They are config data so they can be recalibrated
//! against a labeled dataset without a code change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bounded capacity of the preview queue; oldest candidate evicted past it.
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Hard cap on paragraph patches accepted per batch.
    #[serde(default = "default_max_patches")]
    pub max_patches_per_batch: usize,
}

fn default_queue_capacity() -> usize {
    8
}

fn default_max_patches() -> usize {
    12
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            max_patches_per_batch: default_max_patches(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Whether the idle-triggered loop runs at all.
    #[serde(default = "default_automation_enabled")]
    pub enabled: bool,
    /// Minimum gap between two auto-executions on the same document.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_idle_ms")]
    pub default_idle_ms: u64,
    #[serde(default = "default_idle_ms_min")]
    pub idle_ms_min: u64,
    #[serde(default = "default_idle_ms_max")]
    pub idle_ms_max: u64,
    #[serde(default = "default_max_items")]
    pub default_max_items: usize,
    #[serde(default = "default_max_items_cap")]
    pub max_items_cap: usize,
}

fn default_automation_enabled() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    240
}

fn default_idle_ms() -> u64 {
    65_000
}

fn default_idle_ms_min() -> u64 {
    20_000
}

fn default_idle_ms_max() -> u64 {
    120_000
}

fn default_max_items() -> usize {
    3
}

fn default_max_items_cap() -> usize {
    5
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: default_automation_enabled(),
            cooldown_secs: default_cooldown_secs(),
            default_idle_ms: default_idle_ms(),
            idle_ms_min: default_idle_ms_min(),
            idle_ms_max: default_idle_ms_max(),
            default_max_items: default_max_items(),
            max_items_cap: default_max_items_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Added per action item matching the destructive-intent denylist.
    #[serde(default = "default_destructive_weight")]
    pub destructive_weight: u32,
    /// Added per action item with no recognized edit category.
    #[serde(default = "default_unrecognized_weight")]
    pub unrecognized_weight: u32,
    /// Added per action item classified as translation.
    #[serde(default = "default_translation_weight")]
    pub translation_weight: u32,
    /// Added per action item classified as a heavy rewrite
    /// (write/template/organize/format).
    #[serde(default = "default_heavy_rewrite_weight")]
    pub heavy_rewrite_weight: u32,
    /// Scores below this bucket as low.
    #[serde(default = "default_medium_at")]
    pub medium_at: u32,
    /// Scores at or above this bucket as high.
    #[serde(default = "default_high_at")]
    pub high_at: u32,
}

fn default_destructive_weight() -> u32 {
    3
}

fn default_unrecognized_weight() -> u32 {
    2
}

fn default_translation_weight() -> u32 {
    3
}

fn default_heavy_rewrite_weight() -> u32 {
    2
}

fn default_medium_at() -> u32 {
    2
}

fn default_high_at() -> u32 {
    4
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            destructive_weight: default_destructive_weight(),
            unrecognized_weight: default_unrecognized_weight(),
            translation_weight: default_translation_weight(),
            heavy_rewrite_weight: default_heavy_rewrite_weight(),
            medium_at: default_medium_at(),
            high_at: default_high_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Time box for the LLM routing call before the lexical fallback kicks in.
    #[serde(default = "default_router_timeout_ms")]
    pub llm_timeout_ms: u64,
    /// Absolute similarity floor below which a skill is discarded.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
    /// Relative floor: fraction of the top score a skill must reach.
    #[serde(default = "default_relative_floor")]
    pub relative_floor: f64,
    #[serde(default = "default_max_selected")]
    pub max_selected: usize,
    /// Stricter relative bar for the goal-breakdown skill when co-selected.
    #[serde(default = "default_goal_strict_relative")]
    pub goal_strict_relative: f64,
    /// Absolute bar for the goal-breakdown skill when selected alone.
    #[serde(default = "default_goal_strict_absolute")]
    pub goal_strict_absolute: f64,
    /// Similarity against the fresh-information profile that auto-enables
    /// web search.
    #[serde(default = "default_web_search_floor")]
    pub web_search_floor: f64,
}

fn default_router_timeout_ms() -> u64 {
    1_800
}

fn default_similarity_floor() -> f64 {
    0.05
}

fn default_relative_floor() -> f64 {
    0.62
}

fn default_max_selected() -> usize {
    3
}

fn default_goal_strict_relative() -> f64 {
    0.80
}

fn default_goal_strict_absolute() -> f64 {
    0.12
}

fn default_web_search_floor() -> f64 {
    0.08
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            llm_timeout_ms: default_router_timeout_ms(),
            similarity_floor: default_similarity_floor(),
            relative_floor: default_relative_floor(),
            max_selected: default_max_selected(),
            goal_strict_relative: default_goal_strict_relative(),
            goal_strict_absolute: default_goal_strict_absolute(),
            web_search_floor: default_web_search_floor(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// absent, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(path) if path.exists() => match Self::load_from(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to load pipeline config, using defaults: {:#}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        toml::from_str(&raw).context("Failed to parse pipeline config TOML")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("Failed to serialize pipeline config")?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write config at {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = env::var("SCRIBEFLOW_AUTOMATION_ENABLED") {
            self.automation.enabled = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
        }
        if let Ok(secs) = env::var("SCRIBEFLOW_COOLDOWN_SECS") {
            if let Ok(secs) = secs.parse() {
                self.automation.cooldown_secs = secs;
            }
        }
        if let Ok(ms) = env::var("SCRIBEFLOW_ROUTER_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.router.llm_timeout_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.queue.max_patches_per_batch, 12);
        assert_eq!(config.automation.cooldown_secs, 240);
        assert_eq!(config.automation.default_idle_ms, 65_000);
        assert_eq!(config.risk.destructive_weight, 3);
        assert_eq!(config.risk.high_at, 4);
        assert_eq!(config.router.llm_timeout_ms, 1_800);
        assert!((config.router.relative_floor - 0.62).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "[automation]\ncooldown_secs = 60\n").expect("write config");

        let config = PipelineConfig::load_from(&path).expect("load config");
        assert_eq!(config.automation.cooldown_secs, 60);
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.router.max_selected, 3);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline.toml");

        let mut config = PipelineConfig::default();
        config.risk.high_at = 5;
        config.save(&path).expect("save config");

        let loaded = PipelineConfig::load_from(&path).expect("reload config");
        assert_eq!(loaded.risk.high_at, 5);
    }
}
