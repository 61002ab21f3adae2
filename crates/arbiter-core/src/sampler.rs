//! Task sampling with upstream-context dependencies.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::TasksConfig;
use crate::domain::{ArbiterError, Result, Task, TaskType};

/// Winning outputs of earlier stages, reused as context for later ones.
#[derive(Debug, Clone, Default)]
pub struct UpstreamCache {
    blueprint: Option<Value>,
    characters: Option<Value>,
    story_arc: Option<Value>,
}

impl UpstreamCache {
    pub fn get(&self, task_type: TaskType) -> Option<&Value> {
        match task_type {
            TaskType::Blueprint => self.blueprint.as_ref(),
            TaskType::Characters => self.characters.as_ref(),
            TaskType::StoryArc => self.story_arc.as_ref(),
            TaskType::Chapters => None,
        }
    }

    fn slot(&mut self, task_type: TaskType) -> Option<&mut Option<Value>> {
        match task_type {
            TaskType::Blueprint => Some(&mut self.blueprint),
            TaskType::Characters => Some(&mut self.characters),
            TaskType::StoryArc => Some(&mut self.story_arc),
            TaskType::Chapters => None,
        }
    }

    /// Whether every stage `task_type` depends on has an output cached.
    pub fn satisfies(&self, task_type: TaskType) -> bool {
        task_type.upstream().iter().all(|u| self.get(*u).is_some())
    }
}

#[derive(Debug, Clone)]
pub struct TaskSampler {
    config: TasksConfig,
}

impl TaskSampler {
    pub fn new(config: TasksConfig) -> Self {
        Self { config }
    }

    /// Offer the best output of a round as upstream context.
    ///
    /// Accepted only when `total` reaches `min_upstream_score`. Final-stage
    /// outputs feed nothing and are ignored.
    pub fn record_output(
        &self,
        cache: &mut UpstreamCache,
        task_type: TaskType,
        payload: Value,
        total: f64,
    ) -> bool {
        if total < self.config.min_upstream_score {
            return false;
        }
        match cache.slot(task_type) {
            Some(slot) => {
                *slot = Some(payload);
                debug!(task_type = %task_type, total, "upstream context updated");
                true
            }
            None => false,
        }
    }

    /// Task types that may be drawn given the current cache.
    pub fn dispatchable(&self, cache: &UpstreamCache) -> Vec<(TaskType, f64)> {
        TaskType::ALL
            .into_iter()
            .map(|t| (t, self.config.distribution.weight(t)))
            .filter(|(t, w)| *w > 0.0 && cache.satisfies(*t))
            .collect()
    }

    /// Draw a task. Stages whose upstream context is missing are never
    /// drawn; the distribution is renormalized over the rest.
    pub fn sample<R: Rng + ?Sized>(&self, cache: &UpstreamCache, rng: &mut R) -> Result<Task> {
        let candidates = self.dispatchable(cache);
        let index = WeightedIndex::new(candidates.iter().map(|(_, w)| *w))
            .map_err(|_| ArbiterError::NoDispatchableTask)?;
        let task_type = candidates[index.sample(rng)].0;

        let mut context = Map::new();
        if let Some(prompt) = self.config.prompts.choose(rng) {
            context.insert("user_input".into(), Value::String(prompt.clone()));
        }
        for upstream in task_type.upstream() {
            if let Some(value) = cache.get(*upstream) {
                context.insert(upstream.as_str().into(), value.clone());
            }
        }
        Ok(Task::new(task_type, context))
    }
}
