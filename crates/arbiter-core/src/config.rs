//! TOML configuration for the engine.
//!
//! Every section has a `Default`, so an empty file is a valid config. Values
//! are checked once at startup by [`ArbiterConfig::validate`]; an invalid
//! config is fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::anticheat::{PenaltyPolicy, SimilarityKind};
use crate::domain::{TaskType, WorkerInfo, STRUCTURE_MAX};
use crate::scoring::structure;

const SUM_TOLERANCE: f64 = 1e-6;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Round cadence and fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoundConfig {
    /// Workers queried per round (K).
    pub sample_size: usize,
    pub interval_secs: u64,
    /// Shared deadline for all dispatches in a round.
    pub timeout_secs: u64,
    pub max_in_flight: usize,
    pub stats_every_rounds: u64,
    /// Fixed RNG seed for reproducible task sampling.
    pub seed: Option<u64>,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            interval_secs: 12,
            timeout_secs: 60,
            max_in_flight: 32,
            stats_every_rounds: 10,
            seed: None,
        }
    }
}

impl RoundConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    /// UCB exploration constant `c`.
    pub exploration: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { exploration: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReputationConfig {
    pub alpha: f64,
    pub history_window: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            history_window: 50,
        }
    }
}

/// Blend of stake, current quality and historical quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositeConfig {
    pub stake: f64,
    pub quality: f64,
    pub history: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            stake: 0.15,
            quality: 0.75,
            history: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeightsConfig {
    pub temperature: f64,
    pub floor: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            temperature: 2.0,
            floor: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AntiCheatConfig {
    pub cross_threshold: f64,
    pub history_threshold: f64,
    pub history_depth: usize,
    pub violation_threshold: u32,
    pub blacklist_duration_secs: u64,
    pub similarity: SimilarityKind,
    pub penalty: PenaltyPolicy,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            cross_threshold: 0.90,
            history_threshold: 0.90,
            history_depth: 20,
            violation_threshold: 3,
            blacklist_duration_secs: 24 * 60 * 60,
            similarity: SimilarityKind::BigramJaccard,
            penalty: PenaltyPolicy::default(),
        }
    }
}

impl AntiCheatConfig {
    pub fn blacklist_duration(&self) -> Duration {
        Duration::from_secs(self.blacklist_duration_secs)
    }
}

/// Categorical distribution over task types. Need not sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskDistribution {
    pub blueprint: f64,
    pub characters: f64,
    pub story_arc: f64,
    pub chapters: f64,
}

impl Default for TaskDistribution {
    fn default() -> Self {
        Self {
            blueprint: 0.40,
            characters: 0.25,
            story_arc: 0.25,
            chapters: 0.10,
        }
    }
}

impl TaskDistribution {
    pub fn weight(&self, task_type: TaskType) -> f64 {
        match task_type {
            TaskType::Blueprint => self.blueprint,
            TaskType::Characters => self.characters,
            TaskType::StoryArc => self.story_arc,
            TaskType::Chapters => self.chapters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TasksConfig {
    pub distribution: TaskDistribution,
    /// Pool `user_input` is drawn from.
    pub prompts: Vec<String>,
    /// Minimum total for a response to become upstream context.
    pub min_upstream_score: f64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            distribution: TaskDistribution::default(),
            prompts: vec![
                "A lighthouse keeper discovers the light is signalling someone under the sea".into(),
                "Two rival cartographers must share a ship to chart a vanishing island".into(),
                "A city where every lie told aloud becomes briefly visible".into(),
                "An orchard that only bears fruit on the night someone forgives an old debt".into(),
            ],
            min_upstream_score: 60.0,
        }
    }
}

/// Technical latency tiers and content heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Below `fast_fraction * timeout` the latency sub-score is full.
    pub fast_fraction: f64,
    pub medium_fraction: f64,
    pub hard_fraction: f64,
    pub medium_points: f64,
    pub slow_points: f64,
    /// Sentence token-count range considered fluent prose.
    pub prose_min_tokens: usize,
    pub prose_max_tokens: usize,
    /// Unique-token ratio at or above which lexical variety is full credit.
    pub min_unique_ratio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            fast_fraction: 0.5,
            medium_fraction: 0.75,
            hard_fraction: 1.0,
            medium_points: 7.0,
            slow_points: 4.0,
            prose_min_tokens: 5,
            prose_max_tokens: 40,
            min_unique_ratio: 0.6,
        }
    }
}

/// Structure rule name to point allotment.
pub type Rubric = BTreeMap<String, f64>;

fn rubric(entries: &[(&str, f64)]) -> Rubric {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RubricsConfig {
    pub blueprint: Rubric,
    pub characters: Rubric,
    pub story_arc: Rubric,
    pub chapters: Rubric,
}

impl Default for RubricsConfig {
    fn default() -> Self {
        Self {
            blueprint: rubric(&[
                ("field_completeness", 20.0),
                ("content_length", 10.0),
                ("themes_count", 10.0),
            ]),
            characters: rubric(&[
                ("exact_cardinality", 20.0),
                ("character_completeness", 10.0),
                ("relationships", 10.0),
            ]),
            story_arc: rubric(&[
                ("exact_cardinality", 20.0),
                ("monotonic_progress", 10.0),
                ("act_partition", 10.0),
            ]),
            chapters: rubric(&[
                ("content_length", 20.0),
                ("choice_count", 10.0),
                ("branch_diversity", 10.0),
            ]),
        }
    }
}

impl RubricsConfig {
    pub fn for_task(&self, task_type: TaskType) -> &Rubric {
        match task_type {
            TaskType::Blueprint => &self.blueprint,
            TaskType::Characters => &self.characters,
            TaskType::StoryArc => &self.story_arc,
            TaskType::Chapters => &self.chapters,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerSinkKind {
    #[default]
    Jsonl,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub commit_every_rounds: u64,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub sink: LedgerSinkKind,
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            commit_every_rounds: 100,
            max_retries: 3,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            sink: LedgerSinkKind::Jsonl,
            path: PathBuf::from("arbiter-ledger.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    Memory,
    #[default]
    File,
    Surreal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// JSON document for `file`, surrealkv directory for `surreal`.
    pub path: PathBuf,
    /// Remote SurrealDB endpoint; overrides `path` for the `surreal` backend.
    pub url: Option<String>,
    pub namespace: String,
    pub database: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            path: PathBuf::from("arbiter-state.json"),
            url: None,
            namespace: "arbiter".into(),
            database: "main".into(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArbiterConfig {
    pub round: RoundConfig,
    pub selection: SelectionConfig,
    pub reputation: ReputationConfig,
    pub composite: CompositeConfig,
    pub weights: WeightsConfig,
    pub anticheat: AntiCheatConfig,
    pub tasks: TasksConfig,
    pub scoring: ScoringConfig,
    pub rubrics: RubricsConfig,
    pub ledger: LedgerConfig,
    pub state: StateConfig,
    /// Static worker directory.
    pub workers: Vec<WorkerInfo>,
}

fn check_unit_interval(field: &str, v: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let ok = if allow_zero {
        (0.0..=1.0).contains(&v)
    } else {
        v > 0.0 && v <= 1.0
    };
    if ok {
        Ok(())
    } else if allow_zero {
        Err(invalid(field, format!("{v} is outside [0, 1]")))
    } else {
        Err(invalid(field, format!("{v} is outside (0, 1]")))
    }
}

fn check_positive<T: PartialOrd + Default + std::fmt::Display>(
    field: &str,
    v: T,
) -> Result<(), ConfigError> {
    if v > T::default() {
        Ok(())
    } else {
        Err(invalid(field, format!("{v} must be positive")))
    }
}

impl ArbiterConfig {
    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.round;
        check_positive("round.sample_size", r.sample_size)?;
        check_positive("round.interval_secs", r.interval_secs)?;
        check_positive("round.timeout_secs", r.timeout_secs)?;
        check_positive("round.max_in_flight", r.max_in_flight)?;
        check_positive("round.stats_every_rounds", r.stats_every_rounds)?;

        if !(self.selection.exploration >= 0.0 && self.selection.exploration.is_finite()) {
            return Err(invalid("selection.exploration", "must be a finite non-negative number"));
        }

        check_unit_interval("reputation.alpha", self.reputation.alpha, false)?;
        check_positive("reputation.history_window", self.reputation.history_window)?;

        let c = &self.composite;
        for (field, v) in [
            ("composite.stake", c.stake),
            ("composite.quality", c.quality),
            ("composite.history", c.history),
        ] {
            check_unit_interval(field, v, true)?;
        }
        let sum = c.stake + c.quality + c.history;
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(invalid("composite", format!("weights sum to {sum}, expected 1")));
        }

        if !(self.weights.temperature > 0.0 && self.weights.temperature.is_finite()) {
            return Err(invalid("weights.temperature", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.weights.floor) {
            return Err(invalid("weights.floor", "must be in [0, 1)"));
        }

        let a = &self.anticheat;
        check_unit_interval("anticheat.cross_threshold", a.cross_threshold, false)?;
        check_unit_interval("anticheat.history_threshold", a.history_threshold, false)?;
        check_positive("anticheat.history_depth", a.history_depth)?;
        check_positive("anticheat.violation_threshold", a.violation_threshold)?;
        check_positive("anticheat.blacklist_duration_secs", a.blacklist_duration_secs)?;
        match a.penalty {
            PenaltyPolicy::Multiply { factor } => {
                check_unit_interval("anticheat.penalty.factor", factor, true)?
            }
            PenaltyPolicy::Replace { score } => {
                if !(0.0..=100.0).contains(&score) {
                    return Err(invalid("anticheat.penalty.score", "must be in [0, 100]"));
                }
            }
        }

        let t = &self.tasks;
        for task_type in TaskType::ALL {
            let w = t.distribution.weight(task_type);
            if !(w >= 0.0 && w.is_finite()) {
                return Err(invalid(
                    &format!("tasks.distribution.{task_type}"),
                    "must be a finite non-negative number",
                ));
            }
        }
        if t.distribution.blueprint <= 0.0 {
            return Err(invalid(
                "tasks.distribution.blueprint",
                "must be positive; no other stage can run without a blueprint",
            ));
        }
        if t.prompts.is_empty() {
            return Err(invalid("tasks.prompts", "at least one prompt is required"));
        }
        if !(0.0..=100.0).contains(&t.min_upstream_score) {
            return Err(invalid("tasks.min_upstream_score", "must be in [0, 100]"));
        }

        let s = &self.scoring;
        if !(s.fast_fraction > 0.0
            && s.fast_fraction <= s.medium_fraction
            && s.medium_fraction <= s.hard_fraction)
        {
            return Err(invalid(
                "scoring",
                "latency fractions must satisfy 0 < fast <= medium <= hard",
            ));
        }
        for (field, v) in [
            ("scoring.medium_points", s.medium_points),
            ("scoring.slow_points", s.slow_points),
        ] {
            if !(0.0..=10.0).contains(&v) {
                return Err(invalid(field, "must be in [0, 10]"));
            }
        }
        if s.prose_max_tokens == 0 || s.prose_min_tokens > s.prose_max_tokens {
            return Err(invalid(
                "scoring.prose_max_tokens",
                "prose token range must be non-empty",
            ));
        }
        check_unit_interval("scoring.min_unique_ratio", s.min_unique_ratio, false)?;

        for task_type in TaskType::ALL {
            let rubric = self.rubrics.for_task(task_type);
            let known = structure::rule_names(task_type);
            let mut total = 0.0;
            for (name, points) in rubric {
                let field = format!("rubrics.{task_type}.{name}");
                if !known.contains(&name.as_str()) {
                    return Err(invalid(
                        &field,
                        format!("unknown rule; expected one of {}", known.join(", ")),
                    ));
                }
                if !(*points >= 0.0 && points.is_finite()) {
                    return Err(invalid(&field, "points must be non-negative"));
                }
                total += points;
            }
            if (total - STRUCTURE_MAX).abs() > SUM_TOLERANCE {
                return Err(invalid(
                    &format!("rubrics.{task_type}"),
                    format!("points sum to {total}, expected {STRUCTURE_MAX}"),
                ));
            }
        }

        let l = &self.ledger;
        check_positive("ledger.commit_every_rounds", l.commit_every_rounds)?;
        check_positive("ledger.backoff_initial_ms", l.backoff_initial_ms)?;
        if l.backoff_max_ms < l.backoff_initial_ms {
            return Err(invalid(
                "ledger.backoff_max_ms",
                "must be at least ledger.backoff_initial_ms",
            ));
        }

        let mut seen = BTreeSet::new();
        for w in &self.workers {
            if !seen.insert(&w.id) {
                return Err(invalid("workers", format!("duplicate worker id {}", w.id)));
            }
            if !(w.stake >= 0.0 && w.stake.is_finite()) {
                return Err(invalid(
                    &format!("workers.{}.stake", w.id),
                    "must be a finite non-negative number",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default_config() {
        let config = ArbiterConfig::from_toml_str("").unwrap();
        assert_eq!(config, ArbiterConfig::default());
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = ArbiterConfig::default();
        assert_eq!(c.round.timeout_secs, 60);
        assert_eq!(c.reputation.alpha, 0.1);
        assert_eq!(c.reputation.history_window, 50);
        assert_eq!(c.weights.temperature, 2.0);
        assert_eq!(c.anticheat.cross_threshold, 0.90);
        assert_eq!(c.anticheat.history_depth, 20);
        assert_eq!(c.anticheat.violation_threshold, 3);
        assert_eq!(c.tasks.distribution.blueprint, 0.40);
        assert_eq!(c.ledger.commit_every_rounds, 100);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ArbiterConfig::from_toml_str(
            r#"
            [round]
            sample_size = 4

            [anticheat.penalty]
            policy = "replace"
            score = 5.0

            [[workers]]
            id = "alpha"
            endpoint = "http://127.0.0.1:9001"
            stake = 120.0
            "#,
        )
        .unwrap();
        assert_eq!(config.round.sample_size, 4);
        assert_eq!(config.round.timeout_secs, 60);
        assert_eq!(config.anticheat.penalty, PenaltyPolicy::Replace { score: 5.0 });
        assert_eq!(config.workers.len(), 1);
        assert_eq!(config.workers[0].stake, 120.0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ArbiterConfig::from_toml_str("[round]\nsample_sise = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn composite_weights_must_sum_to_one() {
        let err = ArbiterConfig::from_toml_str(
            "[composite]\nstake = 0.5\nquality = 0.5\nhistory = 0.5\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("composite"));
    }

    #[test]
    fn blueprint_weight_must_be_positive() {
        let mut config = ArbiterConfig::default();
        config.tasks.distribution.blueprint = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tasks.distribution.blueprint"));
    }

    #[test]
    fn rubric_points_must_sum_to_structure_max() {
        let mut config = ArbiterConfig::default();
        config
            .rubrics
            .characters
            .insert("relationships".into(), 15.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rubrics.characters"));
    }

    #[test]
    fn rubric_rules_must_exist_for_the_stage() {
        let mut config = ArbiterConfig::default();
        config.rubrics.blueprint.remove("themes_count");
        config.rubrics.blueprint.insert("act_partition".into(), 10.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown rule"));
    }

    #[test]
    fn thresholds_outside_unit_interval_are_rejected() {
        let mut config = ArbiterConfig::default();
        config.anticheat.cross_threshold = 0.0;
        assert!(config.validate().is_err());
        config.anticheat.cross_threshold = 1.5;
        assert!(config.validate().is_err());
        config.anticheat.cross_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_positive_temperature_is_rejected() {
        let mut config = ArbiterConfig::default();
        config.weights.temperature = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_workers_are_rejected() {
        let mut config = ArbiterConfig::default();
        let w = WorkerInfo {
            id: "w1".into(),
            endpoint: "http://localhost:1".into(),
            stake: 1.0,
        };
        config.workers = vec![w.clone(), w];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate worker id"));
    }

    #[test]
    fn default_config_renders_and_reparses() {
        let rendered = ArbiterConfig::default().to_toml_string().unwrap();
        let reparsed = ArbiterConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, ArbiterConfig::default());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ArbiterConfig::from_file(Path::new("/nonexistent/arbiter.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/arbiter.toml"));
    }
}
