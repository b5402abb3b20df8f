//! Tool-broker mode: the runner executes the agent's tools itself.
//!
//! [`ToolBroker`] implements the six tools against the project directory and
//! [`BrokerWorker`] drives a [`ModelClient`] conversation, feeding tool results
//! back until the model stops asking for tools or the turn budget runs out.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::process::run_command_with_timeout;
use super::worker::{
    EventSink, Flow, TerminateReason, Worker, WorkerExit, WorkerRequest, WorkerUnavailableError,
    terminated,
};
use crate::core::events::{ToolCall, Usage, WorkerEvent};

const TOOL_DEFINITIONS: &str = include_str!("tools.json");

pub const SHELL_TIMEOUT: Duration = Duration::from_secs(120);
pub const OUTPUT_CAP_BYTES: usize = 10_000;
pub const SEARCH_RESULT_CAP: usize = 100;

const SYSTEM_PROMPT: &str = "You are an autonomous coding agent. Work on the tasks described in the \
user message. Use the provided tools to read, write, and edit files, and validate your changes.";

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Result<Vec<ToolDefinition>> {
    serde_json::from_str(TOOL_DEFINITIONS).context("parse tool definitions")
}

/// Result of one brokered tool call, as returned to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Executes the six brokered tools inside a project directory.
#[derive(Debug, Clone)]
pub struct ToolBroker {
    root: PathBuf,
    definitions: Vec<ToolDefinition>,
    shell_timeout: Duration,
    output_cap: usize,
    search_cap: usize,
}

impl ToolBroker {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            definitions: tool_definitions()?,
            shell_timeout: SHELL_TIMEOUT,
            output_cap: OUTPUT_CAP_BYTES,
            search_cap: SEARCH_RESULT_CAP,
        })
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Validate `input` against the tool's schema, then run it.
    #[instrument(skip_all, fields(tool = name))]
    pub fn execute(&self, name: &str, input: &Value) -> ToolOutcome {
        if let Err(err) = self.validate_input(name, input) {
            return ToolOutcome::error(format!("Error: {err:#}"));
        }
        let call = ToolCall::from_parts(name, input);
        match self.execute_call(&call) {
            Ok(content) => ToolOutcome::ok(content),
            Err(err) => {
                debug!(err = %err, "tool failed");
                ToolOutcome::error(format!("Error: {err:#}"))
            }
        }
    }

    fn validate_input(&self, name: &str, input: &Value) -> Result<()> {
        let definition = self
            .definitions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| anyhow!("unknown tool '{name}'"))?;
        let compiled = validator_for(&definition.input_schema)
            .map_err(|err| anyhow!("invalid schema for {name}: {err}"))?;
        let messages: Vec<String> = compiled.iter_errors(input).map(|e| e.to_string()).collect();
        if !messages.is_empty() {
            bail!("invalid input for {name}: {}", messages.join("; "));
        }
        Ok(())
    }

    pub fn execute_call(&self, call: &ToolCall) -> Result<String> {
        match call {
            ToolCall::ReadFile { file_path } => {
                let path = self.resolve(file_path);
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
            }
            ToolCall::WriteFile { file_path, content } => {
                let path = self.resolve(file_path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create directory {}", parent.display()))?;
                }
                fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
                Ok(format!("Wrote {} bytes to {file_path}", content.len()))
            }
            ToolCall::EditFile {
                file_path,
                old_string,
                new_string,
            } => self.edit(file_path, old_string, new_string),
            ToolCall::Shell { command } => self.shell(command),
            ToolCall::Glob { pattern, path } => self.glob(pattern, path.as_deref()),
            ToolCall::Grep { pattern, path } => self.grep(pattern, path.as_deref()),
            ToolCall::Other { name } => Err(anyhow!("unknown tool '{name}'")),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    fn relative(&self, path: &Path, base: &Path) -> String {
        path.strip_prefix(base)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn edit(&self, file_path: &str, old: &str, new: &str) -> Result<String> {
        let path = self.resolve(file_path);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        match contents.matches(old).count() {
            0 => bail!("old_string not found in {file_path}"),
            1 => {}
            n => bail!("old_string matches {n} times in {file_path}; include more context"),
        }
        fs::write(&path, contents.replacen(old, new, 1))
            .with_context(|| format!("write {}", path.display()))?;
        Ok(format!("Edited {file_path}"))
    }

    fn shell(&self, command: &str) -> Result<String> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);
        let out = run_command_with_timeout(cmd, self.shell_timeout, self.output_cap)?;
        if out.timed_out {
            bail!("command timed out after {}s", self.shell_timeout.as_secs());
        }
        let mut text = truncate_bytes(&out.combined(), self.output_cap);
        if !out.status.success() {
            text.push_str(&format!(
                "\n[exit code {}]",
                out.status.code().map_or("signal".to_string(), |c| c.to_string())
            ));
        }
        Ok(text)
    }

    fn glob(&self, pattern: &str, path: Option<&str>) -> Result<String> {
        let base = path.map_or_else(|| self.root.clone(), |p| self.resolve(p));
        let matcher = glob_regex(pattern)?;
        let mut matches: Vec<String> = walk_files(&base)
            .map(|entry| self.relative(entry.path(), &base))
            .filter(|rel| matcher.is_match(rel))
            .collect();
        matches.sort();
        if matches.is_empty() {
            return Ok("No files matched".to_string());
        }
        Ok(cap_entries(matches, self.search_cap))
    }

    fn grep(&self, pattern: &str, path: Option<&str>) -> Result<String> {
        let re = Regex::new(pattern).with_context(|| format!("invalid regex '{pattern}'"))?;
        let target = path.map_or_else(|| self.root.clone(), |p| self.resolve(p));
        let mut files: Vec<PathBuf> = if target.is_file() {
            vec![target.clone()]
        } else {
            walk_files(&target).map(DirEntry::into_path).collect()
        };
        files.sort();

        let mut hits = Vec::new();
        for file in files {
            let Ok(contents) = fs::read_to_string(&file) else {
                continue;
            };
            let rel = self.relative(&file, &self.root);
            for (idx, line) in contents.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{rel}:{}:{line}", idx + 1));
                }
            }
        }
        if hits.is_empty() {
            return Ok("No matches".to_string());
        }
        Ok(truncate_bytes(
            &cap_entries(hits, self.search_cap),
            self.output_cap,
        ))
    }
}

fn walk_files(base: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|n| matches!(n, ".git" | ".a1" | "target" | "node_modules")))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

/// Translate a glob (`*`, `?`, `**`, `{a,b}`) into an anchored regex over `/`-separated paths.
fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    let mut in_group = false;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' => {
                in_group = true;
                out.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            ',' if in_group => out.push('|'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).with_context(|| format!("invalid glob '{pattern}'"))
}

fn cap_entries(mut entries: Vec<String>, cap: usize) -> String {
    let total = entries.len();
    entries.truncate(cap);
    let mut text = entries.join("\n");
    if total > cap {
        text.push_str(&format!("\n[{} more results truncated]", total - cap));
    }
    text
}

fn truncate_bytes(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated at {cap} bytes]", &text[..end])
}

/// One content block of a model reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelBlock {
    Text(String),
    ToolUse { id: String, name: String, input: Value },
}

impl ModelBlock {
    fn to_json(&self) -> Value {
        match self {
            ModelBlock::Text(text) => json!({"type": "text", "text": text}),
            ModelBlock::ToolUse { id, name, input } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": input})
            }
        }
    }
}

/// A model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ModelBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

/// One request in a brokered conversation.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Value],
    pub tools: &'a [ToolDefinition],
}

/// A chat model that may answer with tool calls.
pub trait ModelClient {
    fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse>;
}

/// Worker that talks to a [`ModelClient`] and brokers its tool calls locally.
#[derive(Debug, Clone)]
pub struct BrokerWorker<C> {
    client: C,
}

impl<C: ModelClient> BrokerWorker<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

fn emit(sink: &mut dyn EventSink, event: WorkerEvent) -> Option<TerminateReason> {
    match sink.on_event(&event) {
        Flow::Continue => None,
        Flow::Terminate(reason) => Some(reason),
    }
}

impl<C: ModelClient> Worker for BrokerWorker<C> {
    #[instrument(skip_all, fields(max_turns = request.max_turns))]
    fn run(&self, request: &WorkerRequest, sink: &mut dyn EventSink) -> Result<WorkerExit> {
        let broker = ToolBroker::new(&request.workdir)?;
        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = File::create(&request.log_path)
            .with_context(|| format!("create log file {}", request.log_path.display()))?;
        let mut log = BufWriter::new(file);

        let mut messages = vec![json!({"role": "user", "content": request.prompt})];
        let mut exit_code = 0;

        for turn in 0..request.max_turns {
            if let Flow::Terminate(reason) = sink.poll() {
                return Ok(terminated(sink, reason, None));
            }

            let response = match self.client.complete(&ModelRequest {
                system: SYSTEM_PROMPT,
                messages: &messages,
                tools: broker.definitions(),
            }) {
                Ok(response) => response,
                Err(err) if err.downcast_ref::<WorkerUnavailableError>().is_some() => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(turn, err = %format!("{err:#}"), "model request failed");
                    if let Some(reason) = emit(sink, WorkerEvent::Text(format!("[error] {err:#}"))) {
                        return Ok(terminated(sink, reason, None));
                    }
                    exit_code = 1;
                    break;
                }
            };

            let content: Vec<Value> = response.content.iter().map(ModelBlock::to_json).collect();
            if let Err(e) = writeln!(log, "{}", json!({"type": "assistant", "turn": turn, "content": content})) {
                warn!(err = %e, "failed to write session log");
            }

            if let Some(reason) = emit(sink, WorkerEvent::Usage(response.usage.clone())) {
                return Ok(terminated(sink, reason, None));
            }

            let mut results = Vec::new();
            let mut final_text = Vec::new();
            for block in &response.content {
                match block {
                    ModelBlock::Text(text) => {
                        final_text.push(text.clone());
                        if let Some(reason) = emit(sink, WorkerEvent::Text(text.clone())) {
                            return Ok(terminated(sink, reason, None));
                        }
                    }
                    ModelBlock::ToolUse { id, name, input } => {
                        let event = WorkerEvent::ToolUse {
                            id: id.clone(),
                            call: ToolCall::from_parts(name, input),
                        };
                        if let Some(reason) = emit(sink, event) {
                            return Ok(terminated(sink, reason, None));
                        }
                        let outcome = broker.execute(name, input);
                        results.push(json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": outcome.content,
                            "is_error": outcome.is_error,
                        }));
                    }
                }
            }

            messages.push(json!({"role": "assistant", "content": content}));
            if results.is_empty() {
                if let Some(reason) = emit(sink, WorkerEvent::Result(final_text.join("\n"))) {
                    return Ok(terminated(sink, reason, None));
                }
                break;
            }
            if let Err(e) = writeln!(log, "{}", json!({"type": "user", "turn": turn, "content": results})) {
                warn!(err = %e, "failed to write session log");
            }
            messages.push(json!({"role": "user", "content": results}));
        }

        if let Err(e) = log.flush() {
            warn!(err = %e, "failed to flush session log");
        }
        emit(sink, WorkerEvent::Done {
            exit_code: Some(exit_code),
        });
        Ok(WorkerExit::Finished {
            exit_code: Some(exit_code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    fn broker() -> (tempfile::TempDir, ToolBroker) {
        let temp = tempfile::tempdir().expect("tempdir");
        let broker = ToolBroker::new(temp.path()).expect("broker");
        (temp, broker)
    }

    #[test]
    fn advertises_six_tools() {
        let names: Vec<String> = tool_definitions()
            .expect("defs")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]);
    }

    #[test]
    fn rejects_input_failing_schema() {
        let (_temp, broker) = broker();
        let outcome = broker.execute("Edit", &json!({"file_path": "a.rs"}));
        assert!(outcome.is_error);
        assert!(outcome.content.contains("invalid input for Edit"));

        let outcome = broker.execute("Teleport", &json!({}));
        assert!(outcome.is_error);
        assert!(outcome.content.contains("unknown tool"));
    }

    #[test]
    fn write_then_read() {
        let (_temp, broker) = broker();
        let written = broker.execute("Write", &json!({"file_path": "src/a.txt", "content": "hello"}));
        assert!(!written.is_error, "{}", written.content);
        let read = broker.execute("Read", &json!({"file_path": "src/a.txt"}));
        assert_eq!(read, ToolOutcome::ok("hello"));
    }

    #[test]
    fn edit_requires_unique_match() {
        let (temp, broker) = broker();
        fs::write(temp.path().join("f.txt"), "one two two").expect("write");

        let missing = broker.execute(
            "Edit",
            &json!({"file_path": "f.txt", "old_string": "three", "new_string": "3"}),
        );
        assert!(missing.is_error);
        assert!(missing.content.contains("not found"));

        let ambiguous = broker.execute(
            "Edit",
            &json!({"file_path": "f.txt", "old_string": "two", "new_string": "2"}),
        );
        assert!(ambiguous.is_error);
        assert!(ambiguous.content.contains("matches 2 times"));

        let ok = broker.execute(
            "Edit",
            &json!({"file_path": "f.txt", "old_string": "one", "new_string": "1"}),
        );
        assert!(!ok.is_error);
        assert_eq!(
            fs::read_to_string(temp.path().join("f.txt")).expect("read"),
            "1 two two"
        );
    }

    #[cfg(unix)]
    #[test]
    fn shell_caps_output_and_reports_exit_code() {
        let (_temp, broker) = broker();
        let outcome = broker.execute("Bash", &json!({"command": "head -c 20000 /dev/zero | tr '\\0' 'x'; exit 3"}));
        assert!(!outcome.is_error);
        assert!(outcome.content.contains("[exit code 3]"));
        assert!(outcome.content.len() < 10_200);
    }

    #[cfg(unix)]
    #[test]
    fn shell_timeout_is_an_error() {
        let (temp, _) = broker();
        let broker = ToolBroker::new(temp.path())
            .expect("broker")
            .with_shell_timeout(Duration::from_millis(200));
        let outcome = broker.execute("Bash", &json!({"command": "sleep 5"}));
        assert!(outcome.is_error);
        assert!(outcome.content.contains("timed out"));
    }

    #[test]
    fn glob_is_sorted_and_capped() {
        let (temp, broker) = broker();
        fs::create_dir_all(temp.path().join("src/nested")).expect("mkdir");
        for i in 0..120 {
            fs::write(temp.path().join(format!("src/f{i:03}.rs")), "").expect("write");
        }
        fs::write(temp.path().join("src/nested/deep.rs"), "").expect("write");
        fs::write(temp.path().join("README.md"), "").expect("write");

        let outcome = broker.execute("Glob", &json!({"pattern": "src/**/*.rs"}));
        let lines: Vec<&str> = outcome.content.lines().collect();
        assert_eq!(lines[0], "src/f000.rs");
        assert_eq!(lines.len(), SEARCH_RESULT_CAP + 1);
        assert_eq!(lines[SEARCH_RESULT_CAP], "[21 more results truncated]");

        let outcome = broker.execute("Glob", &json!({"pattern": "*.{md,txt}"}));
        assert_eq!(outcome.content, "README.md");
    }

    #[test]
    fn grep_reports_path_line_and_text() {
        let (temp, broker) = broker();
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/lib.rs"), "fn a() {}\n// TODO: b\nfn c() {}\n").expect("write");
        fs::write(temp.path().join("notes.txt"), "nothing here\n").expect("write");

        let outcome = broker.execute("Grep", &json!({"pattern": "^fn "}));
        assert_eq!(outcome.content, "src/lib.rs:1:fn a() {}\nsrc/lib.rs:3:fn c() {}");

        let outcome = broker.execute("Grep", &json!({"pattern": "("}));
        assert!(outcome.is_error);

        let outcome = broker.execute("Grep", &json!({"pattern": "zzz", "path": "notes.txt"}));
        assert_eq!(outcome.content, "No matches");
    }

    struct ScriptedClient {
        responses: RefCell<VecDeque<ModelResponse>>,
        seen_messages: RefCell<Vec<usize>>,
    }

    impl ModelClient for ScriptedClient {
        fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse> {
            self.seen_messages.borrow_mut().push(request.messages.len());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted response"))
        }
    }

    struct Collect(Vec<WorkerEvent>);

    impl EventSink for Collect {
        fn on_event(&mut self, event: &WorkerEvent) -> Flow {
            self.0.push(event.clone());
            Flow::Continue
        }

        fn poll(&mut self) -> Flow {
            Flow::Continue
        }
    }

    #[test]
    fn broker_worker_runs_tools_until_final_answer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let client = ScriptedClient {
            responses: RefCell::new(VecDeque::from([
                ModelResponse {
                    content: vec![ModelBlock::ToolUse {
                        id: "t1".to_string(),
                        name: "Write".to_string(),
                        input: json!({"file_path": "out.txt", "content": "done"}),
                    }],
                    stop_reason: Some("tool_use".to_string()),
                    usage: Usage {
                        input_tokens: Some(1000),
                        ..Usage::default()
                    },
                },
                ModelResponse {
                    content: vec![ModelBlock::Text("finished".to_string())],
                    stop_reason: Some("end_turn".to_string()),
                    usage: Usage::default(),
                },
            ])),
            seen_messages: RefCell::new(Vec::new()),
        };
        let worker = BrokerWorker::new(client);
        let request = WorkerRequest {
            workdir: temp.path().to_path_buf(),
            prompt: "write out.txt".to_string(),
            max_turns: 5,
            log_path: temp.path().join(".a1/sessions/session_001.log"),
        };
        let mut sink = Collect(Vec::new());
        let exit = worker.run(&request, &mut sink).expect("run");

        assert_eq!(exit, WorkerExit::Finished { exit_code: Some(0) });
        assert_eq!(fs::read_to_string(temp.path().join("out.txt")).expect("read"), "done");
        assert_eq!(*worker.client.seen_messages.borrow(), [1, 3]);
        assert!(sink.0.contains(&WorkerEvent::Result("finished".to_string())));
        assert_eq!(sink.0.last(), Some(&WorkerEvent::Done { exit_code: Some(0) }));
        assert!(request.log_path.is_file());
    }

    #[test]
    fn model_failure_ends_session_with_error_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let worker = BrokerWorker::new(ScriptedClient {
            responses: RefCell::new(VecDeque::new()),
            seen_messages: RefCell::new(Vec::new()),
        });
        let request = WorkerRequest {
            workdir: temp.path().to_path_buf(),
            prompt: "x".to_string(),
            max_turns: 2,
            log_path: temp.path().join("log"),
        };
        let exit = worker.run(&request, &mut Collect(Vec::new())).expect("run");
        assert_eq!(exit, WorkerExit::Finished { exit_code: Some(1) });
    }
}
