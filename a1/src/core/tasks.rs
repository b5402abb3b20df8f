//! Task document model and its pure operations.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::lenient;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn mark(self) -> &'static str {
        match self {
            TaskStatus::Pending => "[ ]",
            TaskStatus::InProgress => "[~]",
            TaskStatus::Done => "[x]",
            TaskStatus::Blocked => "[!]",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Read a status the way an agent might write it. Unknown words are pending.
    pub fn from_loose(value: &Value) -> Self {
        match lenient::status_word(value).as_deref() {
            Some("done" | "completed" | "complete" | "finished") => TaskStatus::Done,
            Some("in_progress" | "inprogress" | "working" | "started" | "active") => {
                TaskStatus::InProgress
            }
            Some("blocked") => TaskStatus::Blocked,
            _ => TaskStatus::Pending,
        }
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(TaskStatus::from_loose(&Value::deserialize(deserializer)?))
    }
}

/// A unit of work in `.a1/tasks.json`.
///
/// The agent edits this file directly. Only `id` and `title` are required;
/// every other field falls back to its default when malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Lower runs first. `0` marks a legacy task awaiting migration.
    #[serde(default, deserialize_with = "lenient::whole_number")]
    pub priority: u32,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub completed_at: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::or_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub success_criteria: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::or_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub raw_thought: Option<String>,
}

/// Free-form operator idea awaiting conversion into tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawThought {
    pub text: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub added_at: String,
}

/// Field changes applied by [`TaskDocument::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<u32>,
    pub completed_at: Option<String>,
    pub success_criteria: Option<String>,
}

/// Whole task document as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDocument {
    pub raw_thoughts: Vec<RawThought>,
    pub tasks: Vec<Task>,
    #[serde(deserialize_with = "lenient::whole_number")]
    pub next_id: u32,
}

impl Default for TaskDocument {
    fn default() -> Self {
        Self {
            raw_thoughts: Vec::new(),
            tasks: Vec::new(),
            next_id: 1,
        }
    }
}

impl TaskDocument {
    /// Renumber legacy tasks lacking a priority to `index + 1`.
    ///
    /// Returns true when anything changed and the document should be re-saved.
    pub fn migrate_priorities(&mut self) -> bool {
        let mut changed = false;
        for (idx, task) in self.tasks.iter_mut().enumerate() {
            if task.priority == 0 {
                task.priority = idx as u32 + 1;
                changed = true;
            }
        }
        changed
    }

    pub fn add(&mut self, title: &str, description: &str, now: &str) -> Task {
        // A hand-edited `next_id` may lag behind the ids in use.
        let mut id = format!("task_{:03}", self.next_id);
        while self.get(&id).is_some() {
            self.next_id += 1;
            id = format!("task_{:03}", self.next_id);
        }
        self.next_id += 1;
        let priority = self.tasks.iter().map(|t| t.priority).max().unwrap_or(0) + 1;
        let task = Task {
            id,
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            priority,
            created_at: now.to_string(),
            completed_at: None,
            success_criteria: None,
            raw_thought: None,
        };
        self.tasks.push(task.clone());
        task
    }

    /// Tasks sorted by priority, optionally filtered by status.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.priority);
        tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn update(&mut self, id: &str, update: &TaskUpdate) -> Option<Task> {
        let task = self.tasks.iter_mut().find(|t| t.id == id)?;
        if let Some(title) = &update.title {
            task.title = title.clone();
        }
        if let Some(description) = &update.description {
            task.description = description.clone();
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(completed_at) = &update.completed_at {
            task.completed_at = Some(completed_at.clone());
        }
        if let Some(criteria) = &update.success_criteria {
            task.success_criteria = Some(criteria.clone());
        }
        Some(task.clone())
    }

    /// Assign priority `position + 1` to each listed id. Unknown ids are ignored.
    pub fn reorder(&mut self, ids: &[String]) {
        for (idx, id) in ids.iter().enumerate() {
            if let Some(task) = self.tasks.iter_mut().find(|t| &t.id == id) {
                task.priority = idx as u32 + 1;
            }
        }
    }

    /// The task to work on next: any in-progress task beats any pending one.
    pub fn next_task(&self) -> Option<&Task> {
        let lowest = |status: TaskStatus| {
            self.tasks
                .iter()
                .filter(|t| t.status == status)
                .min_by_key(|t| t.priority)
        };
        lowest(TaskStatus::InProgress).or_else(|| lowest(TaskStatus::Pending))
    }

    /// `(done, total)` counts.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count();
        (done, self.tasks.len())
    }

    pub fn is_complete(&self) -> bool {
        let (done, total) = self.progress();
        total > 0 && done == total
    }

    pub fn has_open_work(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress))
    }

    pub fn add_raw_thought(&mut self, text: &str, now: &str) {
        self.raw_thoughts.push(RawThought {
            text: text.to_string(),
            added_at: now.to_string(),
        });
    }

    /// Human-readable summary embedded in prompts and `a1 tasks`.
    pub fn summary(&self) -> String {
        let (done, total) = self.progress();
        let mut lines = vec![format!("Progress: {done}/{total} tasks complete"), String::new()];

        for task in self.list(None) {
            lines.push(format!(
                "{} {}: {}",
                task.status.mark(),
                task.id,
                task.title
            ));
            if !task.description.is_empty() {
                lines.push(format!("    {}", task.description));
            }
            if task.status != TaskStatus::Done
                && let Some(criteria) = &task.success_criteria
            {
                lines.push(format!("    SUCCESS CRITERIA: {criteria}"));
            }
        }

        if !self.raw_thoughts.is_empty() {
            lines.push(String::new());
            lines.push("Raw thoughts (not yet tasks):".to_string());
            for thought in &self.raw_thoughts {
                lines.push(format!("  - {}", thought.text));
            }
        }
        lines.join("\n")
    }
}
