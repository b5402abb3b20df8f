//! One worker session: stream events into live metrics and enforce the context budget.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::core::checkpoint::CheckpointStatus;
use crate::core::events::{LogKind, ToolCall, WorkerEvent};
use crate::core::guard::{ContextGuard, GuardDecision};
use crate::core::types::SessionMetrics;
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::timestamp;
use crate::io::worker::{EventSink, Flow, TerminateReason, Worker, WorkerExit, WorkerRequest};

/// Characters of worker narration copied into the run log per event.
const TEXT_LOG_CHARS: usize = 300;

/// Context-window settings for one session.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub window_size: u64,
    pub threshold: f64,
}

/// What the controller learns from one finished session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub exit: WorkerExit,
    pub metrics: SessionMetrics,
    /// Project-relative paths the worker wrote or edited.
    pub files_touched: Vec<String>,
    /// The context guard fired and a checkpoint was written.
    pub checkpointed: bool,
    pub result: Option<String>,
}

/// Event sink that keeps metrics live in the [`RunContext`].
pub struct SessionSink<'a> {
    ctx: &'a RunContext,
    store: &'a CheckpointStore,
    root: PathBuf,
    guard: ContextGuard,
    window_size: u64,
    metrics: SessionMetrics,
    files: BTreeSet<String>,
    result: Option<String>,
    save_error: Option<anyhow::Error>,
}

impl<'a> SessionSink<'a> {
    pub fn new(ctx: &'a RunContext, store: &'a CheckpointStore, root: &Path, budget: Budget) -> Self {
        let metrics = SessionMetrics::started(&timestamp());
        ctx.set_metrics(&metrics);
        Self {
            ctx,
            store,
            root: root.to_path_buf(),
            guard: ContextGuard::new(budget.window_size, budget.threshold),
            window_size: budget.window_size,
            metrics,
            files: BTreeSet::new(),
            result: None,
            save_error: None,
        }
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    fn relative(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(&self.root)
            .map_or_else(|_| path.to_string(), |p| p.to_string_lossy().into_owned())
    }

    /// Persist the mid-session checkpoint written when the guard fires.
    fn checkpoint_for_budget(&mut self) -> Result<()> {
        let percent = self.metrics.context_percent_rounded();
        self.store.update(|checkpoint| {
            checkpoint.status = CheckpointStatus::Working;
            checkpoint.context_percent = percent;
            checkpoint.files_modified.extend(self.files.iter().cloned());
            checkpoint.push_decision(format!(
                "Auto-checkpoint at {percent}% context ({} tokens)",
                self.metrics.tokens_in
            ));
            checkpoint.last_action = Some(format!(
                "Context overflow at {percent}%, session terminated for checkpoint"
            ));
            checkpoint.session_metrics = Some(self.metrics.clone());
        })?;
        Ok(())
    }

    fn on_usage(&mut self) -> Flow {
        self.ctx.set_metrics(&self.metrics);
        match self.guard.observe(self.metrics.tokens_in) {
            GuardDecision::Below | GuardDecision::AlreadyTripped => Flow::Continue,
            GuardDecision::Tripped => {
                let percent = self.metrics.context_percent_rounded();
                info!(percent, tokens_in = self.metrics.tokens_in, "context budget reached");
                self.ctx.log(
                    LogKind::Metric,
                    format!("Context at {percent}%, checkpointing and ending session"),
                );
                if let Err(err) = self.checkpoint_for_budget() {
                    warn!(err = %format!("{err:#}"), "failed to save budget checkpoint");
                    self.save_error = Some(err);
                }
                Flow::Terminate(TerminateReason::ContextBudget)
            }
        }
    }
}

impl EventSink for SessionSink<'_> {
    fn on_event(&mut self, event: &WorkerEvent) -> Flow {
        match event {
            WorkerEvent::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    let short: String = trimmed.chars().take(TEXT_LOG_CHARS).collect();
                    self.ctx.log(LogKind::Text, short);
                }
                Flow::Continue
            }
            WorkerEvent::ToolUse { call, .. } => {
                self.metrics.tools_used += 1;
                if let ToolCall::WriteFile { file_path, .. } | ToolCall::EditFile { file_path, .. } = call {
                    let rel = self.relative(file_path);
                    self.files.insert(rel);
                }
                let (kind, line) = call.display();
                self.ctx.log(kind, line);
                self.ctx.set_metrics(&self.metrics);
                Flow::Continue
            }
            WorkerEvent::Usage(usage) => {
                self.metrics.apply_usage(usage, self.window_size);
                self.on_usage()
            }
            WorkerEvent::Result(text) => {
                self.result = Some(text.clone());
                Flow::Continue
            }
            WorkerEvent::Done { exit_code } => {
                let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                self.ctx.log(LogKind::Session, format!("Worker exited ({code})"));
                Flow::Continue
            }
        }
    }

    fn poll(&mut self) -> Flow {
        if self.ctx.interrupted() {
            Flow::Terminate(TerminateReason::Interrupted)
        } else if self.ctx.stop_requested() {
            Flow::Terminate(TerminateReason::StopRequested)
        } else {
            Flow::Continue
        }
    }
}

/// Run one worker session to completion or early termination.
#[instrument(skip_all, fields(log = %request.log_path.display()))]
pub fn run_session<W: Worker + ?Sized>(
    worker: &W,
    request: &WorkerRequest,
    budget: Budget,
    store: &CheckpointStore,
    ctx: &RunContext,
) -> Result<SessionOutcome> {
    let started = Instant::now();
    let mut sink = SessionSink::new(ctx, store, &request.workdir, budget);
    let exit = worker.run(request, &mut sink)?;
    if let Some(err) = sink.save_error.take() {
        return Err(err.context("save context checkpoint"));
    }

    let mut metrics = sink.metrics.clone();
    metrics.duration_secs = started.elapsed().as_secs();
    ctx.set_metrics(&metrics);
    info!(?exit, tokens_in = metrics.tokens_in, tools = metrics.tools_used, "session finished");

    Ok(SessionOutcome {
        exit,
        metrics,
        files_touched: sink.files.into_iter().collect(),
        checkpointed: sink.guard.fired(),
        result: sink.result,
    })
}
