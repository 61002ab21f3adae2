//! Content sub-score: lexical variety, sentence fluency, relevance to context.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::config::ScoringConfig;
use crate::domain::{Task, CONTENT_MAX};
use crate::scoring::text::{prose, sentences, string_leaves, tokens};

const VARIETY_POINTS: f64 = 10.0;
const FLUENCY_POINTS: f64 = 10.0;
const RELEVANCE_POINTS: f64 = 10.0;

/// Shortest token that counts as a context keyword.
const MIN_KEYWORD_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "against", "also", "been", "before", "being", "between", "both",
    "could", "does", "doing", "during", "each", "from", "further", "have", "having", "here",
    "into", "itself", "just", "more", "most", "once", "only", "other", "over", "same", "should",
    "some", "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "under", "until", "very", "were", "what", "when", "where", "which",
    "while", "whom", "will", "with", "would", "your",
];

/// Unique-token ratio scaled so that `min_unique_ratio` or better is full credit.
pub fn variety(config: &ScoringConfig, text: &str) -> f64 {
    let toks = tokens(text);
    if toks.is_empty() {
        return 0.0;
    }
    let unique: BTreeSet<&String> = toks.iter().collect();
    let ratio = unique.len() as f64 / toks.len() as f64;
    (ratio / config.min_unique_ratio).min(1.0)
}

/// Fraction of sentences whose length is within the prose range.
pub fn fluency(config: &ScoringConfig, text: &str) -> f64 {
    let all = sentences(text);
    if all.is_empty() {
        return 0.0;
    }
    let range = config.prose_min_tokens..=config.prose_max_tokens;
    let fluent = all
        .iter()
        .filter(|s| range.contains(&tokens(s).len()))
        .count();
    fluent as f64 / all.len() as f64
}

/// Keywords drawn from the prompt and the upstream blueprint.
pub fn context_keywords(context: &Map<String, Value>) -> BTreeSet<String> {
    let mut sources: Vec<&str> = Vec::new();
    if let Some(Value::String(input)) = context.get("user_input") {
        sources.push(input);
    }
    if let Some(blueprint) = context.get("blueprint") {
        string_leaves(blueprint, &mut sources);
    }
    sources
        .into_iter()
        .flat_map(tokens)
        .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of context keywords that appear anywhere in the output.
///
/// A context without keywords gives nothing to be relevant to and earns
/// full credit.
pub fn relevance(context: &Map<String, Value>, output: &Map<String, Value>) -> f64 {
    let keywords = context_keywords(context);
    if keywords.is_empty() {
        return 1.0;
    }
    let mut leaves = Vec::new();
    for v in output.values() {
        string_leaves(v, &mut leaves);
    }
    let present: BTreeSet<String> = leaves.into_iter().flat_map(tokens).collect();
    let hits = keywords.iter().filter(|k| present.contains(*k)).count();
    hits as f64 / keywords.len() as f64
}

pub fn score(config: &ScoringConfig, task: &Task, obj: &Map<String, Value>) -> f64 {
    let text = prose(task.task_type, obj);
    let total = VARIETY_POINTS * variety(config, &text)
        + FLUENCY_POINTS * fluency(config, &text)
        + RELEVANCE_POINTS * relevance(&task.context, obj);
    total.clamp(0.0, CONTENT_MAX)
}
