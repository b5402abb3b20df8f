//! Session prompt rendering.
//!
//! A prompt is a pure function of its inputs: whether this is the first
//! session, the checkpoint and task summaries, unread operator messages, and
//! the previous verification result.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;

use crate::core::types::{QueuedMessage, VerificationResult};
use crate::core::verification::MAX_VERIFY_RETRIES;

const FIRST_SESSION_TEMPLATE: &str = include_str!("prompts/first_session.md");
const CONTINUATION_TEMPLATE: &str = include_str!("prompts/continuation.md");
const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");

/// Feedback entries beyond these limits are dropped from the prompt.
const MAX_BLOCKING_SHOWN: usize = 10;
const MAX_WARNINGS_SHOWN: usize = 5;

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

/// Everything a session prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub is_first: bool,
    pub session: u32,
    pub project_dir: String,
    pub max_turns: u32,
    pub checkpoint_summary: String,
    pub tasks_summary: String,
    pub messages: Vec<QueuedMessage>,
    pub last_verification: Option<VerificationResult>,
}

#[derive(Debug, Serialize)]
struct FeedbackContext<'a> {
    retry_count: u32,
    blocking: &'a [String],
    warnings: &'a [String],
    final_attempt: bool,
}

impl<'a> FeedbackContext<'a> {
    /// Feedback only for a failed, non-empty verification.
    fn from_result(result: &'a VerificationResult) -> Option<Self> {
        if result.passed || (result.blocking_issues.is_empty() && result.warnings.is_empty()) {
            return None;
        }
        let blocking = &result.blocking_issues[..result.blocking_issues.len().min(MAX_BLOCKING_SHOWN)];
        let warnings = &result.warnings[..result.warnings.len().min(MAX_WARNINGS_SHOWN)];
        Some(Self {
            retry_count: result.retry_count,
            blocking,
            warnings,
            final_attempt: result.retry_count + 1 >= MAX_VERIFY_RETRIES,
        })
    }
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("first_session", FIRST_SESSION_TEMPLATE)
        .context("load first_session template")?;
    env.add_template("continuation", CONTINUATION_TEMPLATE)
        .context("load continuation template")?;
    env.add_template("feedback", FEEDBACK_TEMPLATE)
        .context("load feedback template")?;
    Ok(env)
}

/// Render the prompt for one session.
pub fn build_prompt(inputs: &PromptInputs) -> Result<String> {
    let env = environment()?;
    let name = if inputs.is_first {
        "first_session"
    } else {
        "continuation"
    };
    let template = env.get_template(name)?;
    let verification = inputs
        .last_verification
        .as_ref()
        .and_then(FeedbackContext::from_result);

    let rendered = template
        .render(context! {
            session => inputs.session,
            project_dir => inputs.project_dir.as_str(),
            max_turns => inputs.max_turns,
            checkpoint_summary => inputs.checkpoint_summary.trim(),
            tasks_summary => inputs.tasks_summary.trim(),
            verification => verification,
            max_retries => MAX_VERIFY_RETRIES,
            messages => inputs.messages,
        })
        .with_context(|| format!("render {name} prompt"))?;

    Ok(BLANK_RUNS.replace_all(&rendered, "\n\n").trim().to_string())
}
