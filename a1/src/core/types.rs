//! Shared deterministic types for runner core logic.
//!
//! These types define stable contracts between core components and the
//! documents persisted under `.a1/`. They must not depend on external state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::events::Usage;
use crate::core::lenient;

/// Outcome classification of a single validator check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckResult {
    Ok,
    Fail,
    /// The check does not apply (no tool, no config, nothing to inspect).
    Skip,
    /// The check could not complete (timeout, spawn failure).
    Error,
}

impl CheckResult {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckResult::Ok => "ok",
            CheckResult::Fail => "fail",
            CheckResult::Skip => "skip",
            CheckResult::Error => "error",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            CheckResult::Ok => "[OK]",
            CheckResult::Fail => "[FAIL]",
            CheckResult::Skip => "[SKIP]",
            CheckResult::Error => "[ERR]",
        }
    }
}

/// Structured report produced by one validator check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub result: CheckResult,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl CheckReport {
    pub fn new(result: CheckResult, message: impl Into<String>) -> Self {
        Self {
            result,
            message: message.into(),
            details: None,
            command: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(CheckResult::Ok, message)
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(CheckResult::Fail, message)
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(CheckResult::Skip, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(CheckResult::Error, message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        if !details.trim().is_empty() {
            self.details = Some(details);
        }
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn is_fail(&self) -> bool {
        self.result == CheckResult::Fail
    }
}

/// Reports from a full validator pass, keyed by check name.
///
/// A `BTreeMap` keeps iteration (and therefore summaries) in a stable order.
pub type CheckReports = BTreeMap<String, CheckReport>;

/// Live resource accounting for one worker session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetrics {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
    pub tools_used: u32,
    /// RFC 3339 timestamp of the session start.
    pub session_start: Option<String>,
    pub duration_secs: u64,
    /// Fraction of the context window in use (`tokens_in / window`).
    pub context_percent: f64,
}

impl SessionMetrics {
    /// Fresh metrics for a session starting at `now`.
    pub fn started(now: &str) -> Self {
        Self {
            session_start: Some(now.to_string()),
            ..Self::default()
        }
    }

    /// Fold a usage report into the metrics. Absent counters keep their value.
    pub fn apply_usage(&mut self, usage: &Usage, window_size: u64) {
        if let Some(n) = usage.input_tokens {
            self.tokens_in = n;
        }
        if let Some(n) = usage.output_tokens {
            self.tokens_out = n;
        }
        if let Some(n) = usage.cache_read_input_tokens {
            self.cache_read = n;
        }
        if let Some(n) = usage.cache_creation_input_tokens {
            self.cache_creation = n;
        }
        if window_size > 0 {
            self.context_percent = self.tokens_in as f64 / window_size as f64;
        }
    }

    /// Whole-number percentage of the context window, as stored in checkpoints.
    pub fn context_percent_rounded(&self) -> u32 {
        (self.context_percent * 100.0).floor() as u32
    }

    pub fn total_tokens(&self) -> u64 {
        self.tokens_in + self.tokens_out
    }
}

/// Result of auditing one finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationResult {
    #[serde(deserialize_with = "lenient::or_default")]
    pub passed: bool,
    #[serde(deserialize_with = "lenient::strings")]
    pub blocking_issues: Vec<String>,
    #[serde(deserialize_with = "lenient::strings")]
    pub warnings: Vec<String>,
    /// Consecutive sessions that ended with blocking issues (reset on pass).
    #[serde(deserialize_with = "lenient::whole_number")]
    pub retry_count: u32,
    #[serde(deserialize_with = "lenient::or_default")]
    pub force_accepted: bool,
}

/// One operator message from `.a1/queue.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub text: String,
    #[serde(default)]
    pub added_at: String,
    #[serde(default)]
    pub read: bool,
}
