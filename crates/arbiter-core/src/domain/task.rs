//! Tasks and the four pipeline stages they belong to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Pipeline stage a task asks a worker to produce.
///
/// Later stages consume the winning output of earlier ones, so the order of
/// variants is also the dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Blueprint,
    Characters,
    StoryArc,
    Chapters,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Blueprint,
        TaskType::Characters,
        TaskType::StoryArc,
        TaskType::Chapters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Blueprint => "blueprint",
            TaskType::Characters => "characters",
            TaskType::StoryArc => "story_arc",
            TaskType::Chapters => "chapters",
        }
    }

    /// Stages whose output must be in the context before this one can run.
    pub fn upstream(&self) -> &'static [TaskType] {
        match self {
            TaskType::Blueprint => &[],
            TaskType::Characters => &[TaskType::Blueprint],
            TaskType::StoryArc => &[TaskType::Blueprint, TaskType::Characters],
            TaskType::Chapters => &[
                TaskType::Blueprint,
                TaskType::Characters,
                TaskType::StoryArc,
            ],
        }
    }

    /// Top-level fields a well-formed output of this stage must carry.
    pub fn required_output_fields(&self) -> &'static [&'static str] {
        match self {
            TaskType::Blueprint => &[
                "title",
                "genre",
                "setting",
                "core_conflict",
                "themes",
                "tone",
                "target_audience",
            ],
            TaskType::Characters => &["characters"],
            TaskType::StoryArc => &["title", "description", "chapters", "arcs", "themes", "hooks"],
            TaskType::Chapters => &["chapters"],
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

/// One unit of work dispatched to a sample of workers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_type: TaskType,
    /// `user_input` plus the upstream outputs this stage depends on.
    pub context: Map<String, Value>,
    pub required_output_fields: Vec<String>,
}

impl Task {
    pub fn new(task_type: TaskType, context: Map<String, Value>) -> Self {
        Self {
            task_type,
            context,
            required_output_fields: task_type
                .required_output_fields()
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }

    pub fn user_input(&self) -> Option<&str> {
        self.context.get("user_input").and_then(Value::as_str)
    }
}

/// Wire form of a task as sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub request_id: Uuid,
    pub round: u64,
    pub task_type: TaskType,
    pub context: Map<String, Value>,
    pub required_output_fields: Vec<String>,
}

impl TaskRequest {
    pub fn new(round: u64, task: &Task) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            round,
            task_type: task.task_type,
            context: task.context.clone(),
            required_output_fields: task.required_output_fields.clone(),
        }
    }
}
