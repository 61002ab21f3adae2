//! Structure rules, one table per task type.
//!
//! Every rule is a pure function from the parsed output to a fraction in
//! `[0, 1]`. The rubric decides how many points each rule is worth.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::config::Rubric;
use crate::domain::{TaskType, STRUCTURE_MAX};
use crate::scoring::text::canonical_json;

pub type Rule = fn(&Map<String, Value>) -> f64;

const BLUEPRINT_FIELDS: [&str; 7] = [
    "title",
    "genre",
    "setting",
    "core_conflict",
    "themes",
    "tone",
    "target_audience",
];

const CHARACTER_FIELDS: [&str; 7] = [
    "id",
    "name",
    "archetype",
    "background",
    "motivation",
    "skills",
    "personality_traits",
];

pub const CHARACTER_COUNT: usize = 5;
pub const CHAPTER_COUNT: usize = 12;
const ACTS: [&str; 4] = ["act1", "act2a", "act2b", "act3"];
const CHAPTERS_PER_ACT: usize = 3;

fn array<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
    obj.get(key).and_then(Value::as_array)
}

fn char_len(obj: &Map<String, Value>, key: &str) -> usize {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.chars().count())
        .unwrap_or(0)
}

fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

// --- blueprint ---

fn blueprint_field_completeness(obj: &Map<String, Value>) -> f64 {
    let present = BLUEPRINT_FIELDS
        .iter()
        .filter(|f| obj.contains_key(**f))
        .count();
    present as f64 / BLUEPRINT_FIELDS.len() as f64
}

fn banded(len: usize, tight: (usize, usize), loose: (usize, usize)) -> f64 {
    if (tight.0..=tight.1).contains(&len) {
        1.0
    } else if (loose.0..=loose.1).contains(&len) {
        0.6
    } else {
        0.0
    }
}

fn blueprint_content_length(obj: &Map<String, Value>) -> f64 {
    let setting = banded(char_len(obj, "setting"), (50, 300), (30, 500));
    let conflict = banded(char_len(obj, "core_conflict"), (30, 200), (15, 300));
    (setting + conflict) / 2.0
}

fn blueprint_themes_count(obj: &Map<String, Value>) -> f64 {
    match array(obj, "themes").map(Vec::len) {
        Some(2..=5) => 1.0,
        Some(1) | Some(6) => 0.5,
        _ => 0.0,
    }
}

// --- characters ---

fn characters(obj: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    array(obj, "characters")
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn characters_exact_cardinality(obj: &Map<String, Value>) -> f64 {
    match array(obj, "characters") {
        Some(items) if items.len() == CHARACTER_COUNT => 1.0,
        _ => 0.0,
    }
}

fn character_completeness(obj: &Map<String, Value>) -> f64 {
    let scores: Vec<f64> = characters(obj)
        .into_iter()
        .map(|c| {
            let present = CHARACTER_FIELDS.iter().filter(|f| c.contains_key(**f)).count();
            present as f64 / CHARACTER_FIELDS.len() as f64
        })
        .collect();
    mean(&scores)
}

fn character_relationships(obj: &Map<String, Value>) -> f64 {
    let scores: Vec<f64> = characters(obj)
        .into_iter()
        .map(|c| {
            let n = match c.get("relationships") {
                Some(Value::Object(m)) => m.len(),
                Some(Value::Array(a)) => a.len(),
                _ => 0,
            };
            match n {
                0 => 0.0,
                1 => 0.5,
                _ => 1.0,
            }
        })
        .collect();
    mean(&scores)
}

// --- story arc ---

fn story_arc_exact_cardinality(obj: &Map<String, Value>) -> f64 {
    match array(obj, "chapters") {
        Some(items) if items.len() == CHAPTER_COUNT => 1.0,
        _ => 0.0,
    }
}

/// Strictly increasing `storyProgress`. Up to two regressions earn partial credit.
fn story_arc_monotonic_progress(obj: &Map<String, Value>) -> f64 {
    let Some(chapters) = array(obj, "chapters") else {
        return 0.0;
    };
    if chapters.is_empty() {
        return 0.0;
    }
    let mut violations = 0usize;
    let mut prev = f64::NEG_INFINITY;
    for chapter in chapters {
        let Some(progress) = chapter.get("storyProgress").and_then(Value::as_f64) else {
            violations += 1;
            continue;
        };
        if progress <= prev {
            violations += 1;
        }
        prev = progress;
    }
    match violations {
        0 => 1.0,
        1 | 2 => 1.0 - violations as f64 / chapters.len() as f64,
        _ => 0.0,
    }
}

fn act_chapters(act: &Value) -> Option<Vec<u64>> {
    act.get("chapters")?
        .as_array()?
        .iter()
        .map(Value::as_u64)
        .collect()
}

/// Acts must partition chapters 1..=12 in order, three per act. An
/// imperfect partition earns half credit per act that holds three chapters.
fn story_arc_act_partition(obj: &Map<String, Value>) -> f64 {
    let Some(arcs) = obj.get("arcs").and_then(Value::as_object) else {
        return 0.0;
    };
    let acts: Vec<Option<Vec<u64>>> = ACTS
        .iter()
        .map(|name| arcs.get(*name).and_then(act_chapters))
        .collect();

    let flattened: Option<Vec<u64>> = acts
        .iter()
        .map(|a| a.as_ref().filter(|c| c.len() == CHAPTERS_PER_ACT).cloned())
        .collect::<Option<Vec<_>>>()
        .map(|v| v.into_iter().flatten().collect());
    let expected: Vec<u64> = (1..=CHAPTER_COUNT as u64).collect();
    if flattened.as_ref() == Some(&expected) {
        return 1.0;
    }

    let well_sized = acts
        .iter()
        .filter(|a| matches!(a, Some(c) if c.len() == CHAPTERS_PER_ACT))
        .count();
    0.5 * well_sized as f64 / ACTS.len() as f64
}

// --- chapters ---

fn chapter_objects(obj: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    array(obj, "chapters")
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn chapters_content_length(obj: &Map<String, Value>) -> f64 {
    let scores: Vec<f64> = chapter_objects(obj)
        .into_iter()
        .map(|c| match char_len(c, "content") {
            1000..=3000 => 1.0,
            3001..=3500 => 0.8,
            800..=999 => 0.7,
            500..=799 => 0.4,
            _ => 0.0,
        })
        .collect();
    mean(&scores)
}

fn chapters_choice_count(obj: &Map<String, Value>) -> f64 {
    let scores: Vec<f64> = chapter_objects(obj)
        .into_iter()
        .map(|c| match array(c, "choices").map(Vec::len) {
            Some(2..=4) => 1.0,
            Some(1) => 0.3,
            Some(n) if n > 4 => 0.6,
            _ => 0.0,
        })
        .collect();
    mean(&scores)
}

/// Ratio of distinct choice consequences per chapter with at least two choices.
fn chapters_branch_diversity(obj: &Map<String, Value>) -> f64 {
    let scores: Vec<f64> = chapter_objects(obj)
        .into_iter()
        .filter_map(|c| {
            let choices = array(c, "choices")?;
            if choices.len() < 2 {
                return None;
            }
            let consequences: Vec<String> = choices
                .iter()
                .filter_map(|choice| choice.get("consequences"))
                .map(canonical_json)
                .collect();
            if consequences.is_empty() {
                return None;
            }
            let unique: BTreeSet<&String> = consequences.iter().collect();
            Some(unique.len() as f64 / consequences.len() as f64)
        })
        .collect();
    mean(&scores)
}

const BLUEPRINT_RULES: &[(&str, Rule)] = &[
    ("field_completeness", blueprint_field_completeness),
    ("content_length", blueprint_content_length),
    ("themes_count", blueprint_themes_count),
];

const CHARACTER_RULES: &[(&str, Rule)] = &[
    ("exact_cardinality", characters_exact_cardinality),
    ("character_completeness", character_completeness),
    ("relationships", character_relationships),
];

const STORY_ARC_RULES: &[(&str, Rule)] = &[
    ("exact_cardinality", story_arc_exact_cardinality),
    ("monotonic_progress", story_arc_monotonic_progress),
    ("act_partition", story_arc_act_partition),
];

const CHAPTER_RULES: &[(&str, Rule)] = &[
    ("content_length", chapters_content_length),
    ("choice_count", chapters_choice_count),
    ("branch_diversity", chapters_branch_diversity),
];

/// Rule table keyed by task type.
pub fn rules(task_type: TaskType) -> &'static [(&'static str, Rule)] {
    match task_type {
        TaskType::Blueprint => BLUEPRINT_RULES,
        TaskType::Characters => CHARACTER_RULES,
        TaskType::StoryArc => STORY_ARC_RULES,
        TaskType::Chapters => CHAPTER_RULES,
    }
}

pub fn rule_names(task_type: TaskType) -> Vec<&'static str> {
    rules(task_type).iter().map(|(name, _)| *name).collect()
}

/// Points per rule for one output. Rules missing from the rubric are worth 0.
pub fn evaluate(
    task_type: TaskType,
    rubric: &Rubric,
    obj: &Map<String, Value>,
) -> Vec<(&'static str, f64)> {
    rules(task_type)
        .iter()
        .map(|(name, rule)| {
            let points = rubric.get(*name).copied().unwrap_or(0.0);
            (*name, rule(obj).clamp(0.0, 1.0) * points)
        })
        .collect()
}

/// Structure sub-score in `[0, STRUCTURE_MAX]`.
pub fn score(task_type: TaskType, rubric: &Rubric, obj: &Map<String, Value>) -> f64 {
    evaluate(task_type, rubric, obj)
        .iter()
        .map(|(_, points)| points)
        .sum::<f64>()
        .clamp(0.0, STRUCTURE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RubricsConfig;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn character(id: u32) -> Value {
        json!({
            "id": id, "name": format!("c{id}"), "archetype": "mentor",
            "background": "b", "motivation": "m", "skills": ["s"],
            "personality_traits": ["calm"],
            "relationships": {"a": "ally", "b": "rival"}
        })
    }

    #[test]
    fn every_task_type_has_three_rules() {
        for t in TaskType::ALL {
            assert_eq!(rules(t).len(), 3, "{t}");
        }
    }

    #[test]
    fn four_characters_fail_exact_cardinality_only() {
        let rubric = &RubricsConfig::default().characters;
        let four = obj(json!({"characters": (1..=4).map(character).collect::<Vec<_>>()}));
        let scored = evaluate(TaskType::Characters, rubric, &four);
        assert_eq!(scored[0], ("exact_cardinality", 0.0));
        assert_eq!(scored[1], ("character_completeness", 10.0));
        assert_eq!(scored[2], ("relationships", 10.0));

        let five = obj(json!({"characters": (1..=5).map(character).collect::<Vec<_>>()}));
        assert_eq!(score(TaskType::Characters, rubric, &five), 40.0);
    }

    #[test]
    fn blueprint_rules() {
        let rubric = &RubricsConfig::default().blueprint;
        let full = obj(json!({
            "title": "Drift", "genre": "mystery",
            "setting": "x".repeat(120), "core_conflict": "y".repeat(80),
            "themes": ["loss", "trust", "tides"], "tone": "wistful", "target_audience": "adult"
        }));
        assert_eq!(score(TaskType::Blueprint, rubric, &full), 40.0);

        let sparse = obj(json!({"title": "Drift", "themes": ["loss"]}));
        let scored = evaluate(TaskType::Blueprint, rubric, &sparse);
        assert!((scored[0].1 - 20.0 / 7.0).abs() < 1e-9);
        assert_eq!(scored[1].1, 0.0);
        assert_eq!(scored[2].1, 5.0);
    }

    #[test]
    fn progress_regressions_earn_partial_credit() {
        let progress = |values: &[f64]| -> Map<String, Value> {
            obj(json!({"chapters": values.iter().map(|p| json!({"storyProgress": p})).collect::<Vec<_>>()}))
        };
        assert_eq!(story_arc_monotonic_progress(&progress(&[1.0, 2.0, 3.0, 4.0][..])), 1.0);
        assert_eq!(story_arc_monotonic_progress(&progress(&[1.0, 3.0, 2.0, 4.0][..])), 0.75);
        assert_eq!(story_arc_monotonic_progress(&progress(&[4.0, 3.0, 2.0, 1.0][..])), 0.0);
    }

    #[test]
    fn act_partition_requires_ordered_cover() {
        let arcs = |acts: [[u64; 3]; 4]| {
            obj(json!({"arcs": {
                "act1": {"chapters": acts[0]}, "act2a": {"chapters": acts[1]},
                "act2b": {"chapters": acts[2]}, "act3": {"chapters": acts[3]},
            }}))
        };
        let good = arcs([[1, 2, 3], [4, 5, 6], [7, 8, 9], [10, 11, 12]]);
        assert_eq!(story_arc_act_partition(&good), 1.0);

        let overlapping = arcs([[1, 2, 3], [3, 4, 5], [7, 8, 9], [10, 11, 12]]);
        assert_eq!(story_arc_act_partition(&overlapping), 0.5);

        assert_eq!(story_arc_act_partition(&obj(json!({"arcs": {}}))), 0.0);
    }

    #[test]
    fn chapter_rules() {
        let chapter = |len: usize, choices: Value| json!({"content": "a".repeat(len), "choices": choices});
        let diverse = json!([{"consequences": {"trust": 1}}, {"consequences": {"trust": -1}}]);
        let same = json!([{"consequences": {"trust": 1}}, {"consequences": {"trust": 1}}]);
        let out = obj(json!({"chapters": [chapter(1500, diverse), chapter(600, same)]}));

        assert!((chapters_content_length(&out) - 0.7).abs() < 1e-9);
        assert_eq!(chapters_choice_count(&out), 1.0);
        assert!((chapters_branch_diversity(&out) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn wrong_shapes_score_zero_without_panicking() {
        let junk = obj(json!({"characters": "five", "chapters": 12, "arcs": [], "themes": {}}));
        for t in TaskType::ALL {
            let s = score(t, RubricsConfig::default().for_task(t), &junk);
            assert!((0.0..=STRUCTURE_MAX).contains(&s));
        }
    }
}
