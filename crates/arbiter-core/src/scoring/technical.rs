//! Technical sub-score: parseability, required fields, latency.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::ScoringConfig;
use crate::domain::{Task, TECHNICAL_MAX};

const PARSE_POINTS: f64 = 10.0;
const FIELDS_POINTS: f64 = 10.0;
const LATENCY_POINTS: f64 = 10.0;

/// Fraction of required output fields present at the top level.
pub fn field_coverage(task: &Task, obj: &Map<String, Value>) -> f64 {
    if task.required_output_fields.is_empty() {
        return 1.0;
    }
    let present = task
        .required_output_fields
        .iter()
        .filter(|f| obj.contains_key(f.as_str()))
        .count();
    present as f64 / task.required_output_fields.len() as f64
}

/// Latency points by tier, relative to the round timeout.
pub fn latency_points(config: &ScoringConfig, latency: Duration, timeout: Duration) -> f64 {
    let ratio = latency.as_secs_f64() / timeout.as_secs_f64().max(f64::EPSILON);
    if ratio < config.fast_fraction {
        LATENCY_POINTS
    } else if ratio < config.medium_fraction {
        config.medium_points
    } else if ratio < config.hard_fraction {
        config.slow_points
    } else {
        0.0
    }
}

/// Technical score of an output that already parsed to an object.
pub fn score(
    config: &ScoringConfig,
    task: &Task,
    obj: &Map<String, Value>,
    latency: Duration,
    timeout: Duration,
) -> f64 {
    let total = PARSE_POINTS
        + FIELDS_POINTS * field_coverage(task, obj)
        + latency_points(config, latency, timeout);
    total.clamp(0.0, TECHNICAL_MAX)
}
