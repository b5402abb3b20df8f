//! Worker event protocol.
//!
//! Workers report progress as a stream of [`WorkerEvent`]s. The CLI worker
//! emits newline-delimited JSON which is decoded here exactly once; the rest
//! of the runner only ever sees the closed enum.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Token accounting reported by the worker.
///
/// Counters the worker did not report are `None` so consumers can keep the
/// previous value instead of resetting it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

/// A tool invocation requested by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "input")]
pub enum ToolCall {
    #[serde(rename = "Read")]
    ReadFile { file_path: String },
    #[serde(rename = "Write")]
    WriteFile { file_path: String, content: String },
    #[serde(rename = "Edit")]
    EditFile {
        file_path: String,
        old_string: String,
        new_string: String,
    },
    #[serde(rename = "Bash")]
    Shell { command: String },
    #[serde(rename = "Glob")]
    Glob {
        pattern: String,
        #[serde(default)]
        path: Option<String>,
    },
    #[serde(rename = "Grep")]
    Grep {
        pattern: String,
        #[serde(default)]
        path: Option<String>,
    },
    /// Any tool outside the six the runner knows how to broker.
    #[serde(skip)]
    Other { name: String },
}

impl ToolCall {
    /// Decode a named tool call. Unknown names or malformed inputs become `Other`.
    pub fn from_parts(name: &str, input: &Value) -> Self {
        serde_json::from_value(json!({ "name": name, "input": input })).unwrap_or_else(|_| {
            ToolCall::Other {
                name: name.to_string(),
            }
        })
    }

    pub fn name(&self) -> &str {
        match self {
            ToolCall::ReadFile { .. } => "Read",
            ToolCall::WriteFile { .. } => "Write",
            ToolCall::EditFile { .. } => "Edit",
            ToolCall::Shell { .. } => "Bash",
            ToolCall::Glob { .. } => "Glob",
            ToolCall::Grep { .. } => "Grep",
            ToolCall::Other { name } => name,
        }
    }

    /// One-line label and category for the activity log.
    pub fn display(&self) -> (LogKind, String) {
        match self {
            ToolCall::ReadFile { file_path } => (LogKind::Read, format!("[Read] {file_path}")),
            ToolCall::Glob { pattern, .. } => (LogKind::Read, format!("[Glob] {pattern}")),
            ToolCall::Grep { pattern, .. } => (LogKind::Read, format!("[Grep] {pattern}")),
            ToolCall::EditFile { file_path, .. } => (LogKind::Edit, format!("[Edit] {file_path}")),
            ToolCall::WriteFile { file_path, .. } => {
                (LogKind::Edit, format!("[Write] {file_path}"))
            }
            ToolCall::Shell { command } => {
                let short: String = command.chars().take(80).collect();
                (LogKind::Shell, format!("[Bash] {short}"))
            }
            ToolCall::Other { name } => (LogKind::Shell, format!("[{name}]")),
        }
    }
}

/// Category of an activity-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Text,
    Read,
    Edit,
    Shell,
    Metric,
    Verify,
    Session,
    Error,
}

/// One event in a worker's execution stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Narration or reasoning text.
    Text(String),
    ToolUse { id: String, call: ToolCall },
    Usage(Usage),
    /// Final result message of the session.
    Result(String),
    /// The worker process exited.
    Done { exit_code: Option<i32> },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine {
    Assistant {
        message: AssistantMessage,
    },
    Result {
        #[serde(default)]
        result: Value,
    },
    RateLimitEvent {
        #[serde(default)]
        usage: Option<Usage>,
    },
    #[serde(other)]
    Ignored,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Decode one line of `--output-format stream-json` output.
///
/// Non-JSON lines are surfaced as text. System and user lines, and JSON the
/// decoder does not recognise, produce no events.
pub fn decode_stream_line(line: &str) -> Vec<WorkerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return vec![WorkerEvent::Text(line.to_string())],
    };
    let Ok(parsed) = serde_json::from_value::<StreamLine>(value) else {
        return Vec::new();
    };

    match parsed {
        StreamLine::Assistant { message } => {
            let mut events = Vec::new();
            for block in message.content {
                match block {
                    ContentBlock::Text { text } if !text.trim().is_empty() => {
                        events.push(WorkerEvent::Text(text));
                    }
                    ContentBlock::Thinking { thinking } if !thinking.trim().is_empty() => {
                        events.push(WorkerEvent::Text(thinking));
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        events.push(WorkerEvent::ToolUse {
                            id,
                            call: ToolCall::from_parts(&name, &input),
                        });
                    }
                    _ => {}
                }
            }
            if let Some(usage) = message.usage {
                events.push(WorkerEvent::Usage(usage));
            }
            events
        }
        StreamLine::Result { result } => {
            let text = match result {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            vec![WorkerEvent::Result(text)]
        }
        StreamLine::RateLimitEvent { usage: Some(usage) } => vec![WorkerEvent::Usage(usage)],
        StreamLine::RateLimitEvent { usage: None } | StreamLine::Ignored => Vec::new(),
    }
}
