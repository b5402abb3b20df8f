//! Runner configuration stored under `.a1/config.toml`.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::json::write_atomic;
use crate::core::guard::{DEFAULT_THRESHOLD, DEFAULT_WINDOW_SIZE};

/// Environment variable consulted for the Messages API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// How sessions are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Spawn the `claude` CLI and decode its event stream.
    #[default]
    ClaudeCli,
    /// Call the Messages API and execute tools locally.
    ClaudeApi,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::ClaudeCli => "claude-cli",
            Provider::ClaudeApi => "claude-api",
        }
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-cli" | "claude-max" => Ok(Provider::ClaudeCli),
            "claude-api" => Ok(Provider::ClaudeApi),
            other => Err(anyhow!(
                "unknown provider '{other}' (expected claude-cli or claude-api)"
            )),
        }
    }
}

/// Runner configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    pub provider: Provider,
    /// Model override passed to the worker.
    pub model: Option<String>,
    /// Executable used by the CLI provider.
    pub claude_binary: String,
    /// API key for the API provider. Prefer `ANTHROPIC_API_KEY`.
    pub api_key: Option<String>,
    pub max_sessions: u32,
    /// Tool-use turn budget per session.
    pub max_turns: u32,
    /// Pause between sessions.
    pub session_delay_secs: u64,
    /// Fraction of the context window at which a session is checkpointed.
    pub context_threshold: f64,
    pub context_window: u64,
    /// Grace period between SIGTERM and kill when stopping a worker.
    pub termination_grace_secs: u64,
    pub validator: ValidatorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            claude_binary: "claude".to_string(),
            api_key: None,
            max_sessions: 100,
            max_turns: 25,
            session_delay_secs: 5,
            context_threshold: DEFAULT_THRESHOLD,
            context_window: DEFAULT_WINDOW_SIZE,
            termination_grace_secs: 10,
            validator: ValidatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Timeout for syntax, lint, build and git checks.
    pub timeout_secs: u64,
    /// Timeout for the test suite.
    pub test_timeout_secs: u64,
    /// Truncate captured check output beyond this many bytes.
    pub output_limit_bytes: usize,
    pub syntax: Option<CheckCommand>,
    pub tests: Option<CheckCommand>,
    pub lint: Option<CheckCommand>,
    pub build: Option<CheckCommand>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            test_timeout_secs: 120,
            output_limit_bytes: 100_000,
            syntax: None,
            tests: None,
            lint: None,
            build: None,
        }
    }
}

/// Explicit command for one check (e.g. `command = ["just", "test"]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckCommand {
    pub command: Vec<String>,
}

/// Values supplied on the command line; they win over file and env values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub max_sessions: Option<u32>,
    pub max_turns: Option<u32>,
    pub session_delay_secs: Option<u64>,
    pub api_key: Option<String>,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(anyhow!("max_sessions must be > 0"));
        }
        if self.max_turns == 0 {
            return Err(anyhow!("max_turns must be > 0"));
        }
        if !(self.context_threshold > 0.0 && self.context_threshold <= 1.0) {
            return Err(anyhow!("context_threshold must be in (0, 1]"));
        }
        if self.context_window == 0 {
            return Err(anyhow!("context_window must be > 0"));
        }
        if self.claude_binary.trim().is_empty() {
            return Err(anyhow!("claude_binary must be non-empty"));
        }
        if self.validator.timeout_secs == 0 || self.validator.test_timeout_secs == 0 {
            return Err(anyhow!("validator timeouts must be > 0"));
        }
        if self.validator.output_limit_bytes == 0 {
            return Err(anyhow!("validator.output_limit_bytes must be > 0"));
        }
        for (name, check) in [
            ("syntax", &self.validator.syntax),
            ("tests", &self.validator.tests),
            ("lint", &self.validator.lint),
            ("build", &self.validator.build),
        ] {
            if let Some(check) = check
                && check.command.first().is_none_or(|c| c.trim().is_empty())
            {
                return Err(anyhow!("validator.{name}.command must be a non-empty array"));
            }
        }
        Ok(())
    }

    /// Layer environment and command-line values over the file values.
    ///
    /// Precedence: overrides > `env_api_key` > file > defaults.
    pub fn resolve(mut self, overrides: &ConfigOverrides, env_api_key: Option<String>) -> Result<Self> {
        if let Some(key) = env_api_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(provider) = overrides.provider {
            self.provider = provider;
        }
        if let Some(model) = &overrides.model {
            self.model = Some(model.clone());
        }
        if let Some(n) = overrides.max_sessions {
            self.max_sessions = n;
        }
        if let Some(n) = overrides.max_turns {
            self.max_turns = n;
        }
        if let Some(secs) = overrides.session_delay_secs {
            self.session_delay_secs = secs;
        }
        if let Some(key) = &overrides.api_key {
            self.api_key = Some(key.clone());
        }
        self.validate()?;
        Ok(self)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
