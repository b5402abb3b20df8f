//! Checkpoint record: the resumable state of a run.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::lenient;
use crate::core::types::{SessionMetrics, VerificationResult};

pub const CHECKPOINT_VERSION: u32 = 1;
/// Decisions older than the most recent `MAX_DECISIONS` are dropped.
pub const MAX_DECISIONS: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckpointStatus {
    #[default]
    Starting,
    Working,
    Completed,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::Starting => "STARTING",
            CheckpointStatus::Working => "WORKING",
            CheckpointStatus::Completed => "COMPLETED",
        }
    }

    /// Case-insensitive read. Anything unrecognised counts as work in progress.
    pub fn from_loose(value: &Value) -> Self {
        match lenient::status_word(value).as_deref() {
            Some("starting") => CheckpointStatus::Starting,
            Some("completed" | "complete" | "done") => CheckpointStatus::Completed,
            _ => CheckpointStatus::Working,
        }
    }
}

impl<'de> Deserialize<'de> for CheckpointStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(CheckpointStatus::from_loose(&Value::deserialize(deserializer)?))
    }
}

/// Current run state, shared by the runner and the agent it drives.
///
/// The agent edits `checkpoint.json` directly, so every field tolerates
/// absence or a malformed value on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Checkpoint {
    #[serde(deserialize_with = "lenient::whole_number")]
    pub version: u32,
    pub status: CheckpointStatus,
    #[serde(deserialize_with = "lenient::whole_number")]
    pub session: u32,
    #[serde(deserialize_with = "lenient::or_default")]
    pub current_task: Option<String>,
    /// Whole-number percentage of the context window used by the last session.
    #[serde(deserialize_with = "lenient::whole_number")]
    pub context_percent: u32,
    #[serde(deserialize_with = "lenient::strings")]
    pub files_modified: BTreeSet<String>,
    #[serde(deserialize_with = "lenient::strings")]
    pub decisions: Vec<String>,
    #[serde(deserialize_with = "lenient::strings")]
    pub next_steps: Vec<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub last_action: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub session_metrics: Option<SessionMetrics>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub last_verification: Option<VerificationResult>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub created_at: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub updated_at: String,
    #[serde(deserialize_with = "lenient::or_default")]
    pub session_started_at: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub session_ended_at: Option<String>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub completed_at: Option<String>,
}

/// What a finished session contributes to the checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEnd {
    pub current_task: Option<String>,
    pub files_modified: Vec<String>,
    pub decisions: Vec<String>,
    /// Replaces the previous next steps when `Some`.
    pub next_steps: Option<Vec<String>>,
    pub last_action: Option<String>,
    pub context_percent: Option<u32>,
}

impl Checkpoint {
    pub fn initial(now: &str) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            status: CheckpointStatus::Starting,
            created_at: now.to_string(),
            updated_at: now.to_string(),
            ..Self::default()
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }

    pub fn start_session(&mut self, now: &str) {
        self.session += 1;
        self.status = CheckpointStatus::Working;
        self.session_started_at = Some(now.to_string());
    }

    pub fn end_session(&mut self, end: SessionEnd, now: &str) {
        if let Some(task) = end.current_task {
            self.current_task = Some(task);
        }
        self.files_modified.extend(end.files_modified);
        for decision in end.decisions {
            self.push_decision(decision);
        }
        if let Some(steps) = end.next_steps {
            self.next_steps = steps;
        }
        if let Some(action) = end.last_action {
            self.last_action = Some(action);
        }
        if let Some(percent) = end.context_percent {
            self.context_percent = percent;
        }
        self.session_ended_at = Some(now.to_string());
    }

    pub fn mark_completed(&mut self, now: &str) {
        self.status = CheckpointStatus::Completed;
        self.completed_at = Some(now.to_string());
    }

    pub fn push_decision(&mut self, decision: impl Into<String>) {
        self.decisions.push(decision.into());
        self.truncate_decisions();
    }

    pub fn truncate_decisions(&mut self) {
        if self.decisions.len() > MAX_DECISIONS {
            let excess = self.decisions.len() - MAX_DECISIONS;
            self.decisions.drain(..excess);
        }
    }

    /// Human-readable summary embedded in continuation prompts.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Session: {}", self.session),
            format!("Status: {}", self.status.as_str()),
            format!(
                "Current task: {}",
                self.current_task.as_deref().unwrap_or("None")
            ),
            format!("Context used: {}%", self.context_percent),
        ];
        if let Some(action) = &self.last_action {
            lines.push(format!("Last action: {action}"));
        }

        if !self.files_modified.is_empty() {
            lines.push(String::new());
            lines.push("Files modified:".to_string());
            let skip = self.files_modified.len().saturating_sub(10);
            for file in self.files_modified.iter().skip(skip) {
                lines.push(format!("  - {file}"));
            }
        }

        if !self.decisions.is_empty() {
            lines.push(String::new());
            lines.push("Recent decisions:".to_string());
            let skip = self.decisions.len().saturating_sub(5);
            for decision in self.decisions.iter().skip(skip) {
                lines.push(format!("  - {decision}"));
            }
        }

        if !self.next_steps.is_empty() {
            lines.push(String::new());
            lines.push("Next steps:".to_string());
            for step in &self.next_steps {
                lines.push(format!("  - {step}"));
            }
        }
        lines.join("\n")
    }
}
