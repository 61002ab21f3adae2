//! Deterministic quality scoring of worker responses.
//!
//! Three independent dimensions:
//! - `technical` (0-30): parses, carries required fields, arrives in time
//! - `structure` (0-40): task-specific rule table weighted by the rubric
//! - `content` (0-30): lexical variety, sentence fluency, context relevance
//!
//! A payload that does not parse to a JSON object scores zero everywhere.

pub mod content;
pub mod structure;
pub mod technical;
pub mod text;

use std::time::Duration;

use crate::config::{RubricsConfig, ScoringConfig};
use crate::domain::{ScoreBreakdown, Task, WorkerResponse};

/// Pure scorer. Holds configuration only.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    scoring: ScoringConfig,
    rubrics: RubricsConfig,
    timeout: Duration,
}

impl QualityScorer {
    pub fn new(scoring: ScoringConfig, rubrics: RubricsConfig, timeout: Duration) -> Self {
        Self {
            scoring,
            rubrics,
            timeout,
        }
    }

    pub fn score(&self, response: &WorkerResponse, task: &Task) -> ScoreBreakdown {
        let Some(obj) = text::as_object(&response.payload) else {
            return ScoreBreakdown::zero();
        };
        ScoreBreakdown::new(
            technical::score(&self.scoring, task, &obj, response.latency, self.timeout),
            structure::score(task.task_type, self.rubrics.for_task(task.task_type), &obj),
            content::score(&self.scoring, task, &obj),
        )
    }
}
