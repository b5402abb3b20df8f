//! Worker backends: the external agent that executes one bounded session.

use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::process::{is_not_found, spawn_line_stream, terminate_gracefully};
use crate::core::events::{WorkerEvent, decode_stream_line};

/// How often a streaming worker checks for stop requests while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Bound on captured worker stderr.
const STDERR_LIMIT_BYTES: usize = 64 * 1024;

/// The worker could not be started (binary missing, service unreachable, no credentials).
#[derive(Debug, Error)]
#[error("worker unavailable: {reason}")]
pub struct WorkerUnavailableError {
    pub reason: String,
}

/// Input for one worker session.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub workdir: PathBuf,
    pub prompt: String,
    pub max_turns: u32,
    /// Raw worker output is appended here.
    pub log_path: PathBuf,
}

/// Why the controller asked the worker to stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// Context usage crossed the threshold; the session was checkpointed.
    ContextBudget,
    StopRequested,
    Interrupted,
}

/// Whether the worker should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate(TerminateReason),
}

/// Receives worker events as they stream and decides whether to continue.
pub trait EventSink {
    fn on_event(&mut self, event: &WorkerEvent) -> Flow;

    /// Called periodically while the worker is quiet.
    fn poll(&mut self) -> Flow;
}

/// How a worker session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Finished { exit_code: Option<i32> },
    Terminated(TerminateReason),
}

/// Close a stream cut short by `sink`. Every stream ends with `Done`.
pub(crate) fn terminated(
    sink: &mut dyn EventSink,
    reason: TerminateReason,
    exit_code: Option<i32>,
) -> WorkerExit {
    sink.on_event(&WorkerEvent::Done { exit_code });
    WorkerExit::Terminated(reason)
}

/// Executes one bounded session, streaming events into `sink`.
pub trait Worker {
    fn run(&self, request: &WorkerRequest, sink: &mut dyn EventSink) -> Result<WorkerExit>;
}

impl<W: Worker + ?Sized> Worker for Box<W> {
    fn run(&self, request: &WorkerRequest, sink: &mut dyn EventSink) -> Result<WorkerExit> {
        (**self).run(request, sink)
    }
}

/// Runs the `claude` CLI in non-interactive stream-json mode.
#[derive(Debug, Clone)]
pub struct ClaudeCliWorker {
    binary: String,
    model: Option<String>,
    grace: Duration,
}

impl ClaudeCliWorker {
    pub fn new(binary: impl Into<String>, model: Option<String>, grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            model,
            grace,
        }
    }

    fn command(&self, request: &WorkerRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(&request.prompt)
            .arg("--dangerously-skip-permissions")
            .arg("--no-session-persistence")
            .arg("--max-turns")
            .arg(request.max_turns.to_string())
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json");
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        // Running inside another agent session would make the CLI refuse to start.
        cmd.env_remove("CLAUDECODE");
        cmd.current_dir(&request.workdir);
        cmd
    }
}

impl Worker for ClaudeCliWorker {
    #[instrument(skip_all, fields(binary = %self.binary, max_turns = request.max_turns))]
    fn run(&self, request: &WorkerRequest, sink: &mut dyn EventSink) -> Result<WorkerExit> {
        let mut stream = match spawn_line_stream(self.command(request), &request.log_path, STDERR_LIMIT_BYTES) {
            Ok(stream) => stream,
            Err(err) if is_not_found(&err) => {
                return Err(WorkerUnavailableError {
                    reason: format!("'{}' not found on PATH", self.binary),
                }
                .into());
            }
            Err(err) => return Err(err).context("start worker"),
        };
        info!(pid = stream.child.id(), "worker started");

        let stop = loop {
            match stream.lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    let mut flow = Flow::Continue;
                    for event in decode_stream_line(&line) {
                        flow = sink.on_event(&event);
                        if flow != Flow::Continue {
                            break;
                        }
                    }
                    if flow == Flow::Continue {
                        flow = sink.poll();
                    }
                    if let Flow::Terminate(reason) = flow {
                        break Some(reason);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Flow::Terminate(reason) = sink.poll() {
                        break Some(reason);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };

        if let Some(reason) = stop {
            info!(?reason, "terminating worker");
            let status = terminate_gracefully(&mut stream.child, self.grace)?;
            debug!(exit_code = ?status.code(), "worker terminated");
            return Ok(terminated(sink, reason, status.code()));
        }

        let status = stream.child.wait().context("wait for worker")?;
        let stderr = stream.finish()?;
        if !status.success() && !stderr.trim().is_empty() {
            warn!(exit_code = ?status.code(), stderr = %stderr.trim(), "worker exited with error");
        }
        sink.on_event(&WorkerEvent::Done {
            exit_code: status.code(),
        });
        Ok(WorkerExit::Finished {
            exit_code: status.code(),
        })
    }
}
