//! Session loop controller for `a1 start`.
//!
//! Runs sessions until the work is complete and verified, the session budget is
//! exhausted, or the run is stopped. Per session: start the checkpoint session,
//! build the prompt, run the worker, record metrics, verify, decide.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::context::RunContext;
use crate::core::checkpoint::{CheckpointStatus, SessionEnd};
use crate::core::events::LogKind;
use crate::core::prompt::{PromptInputs, build_prompt};
use crate::core::verification::Baseline;
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::config::RunnerConfig;
use crate::io::init::A1Paths;
use crate::io::operator::Operator;
use crate::io::queue::MessageQueue;
use crate::io::task_store::TaskStore;
use crate::io::timestamp;
use crate::io::validator::Validator;
use crate::io::worker::{Worker, WorkerRequest, WorkerUnavailableError};
use crate::session::{Budget, SessionOutcome, run_session};
use crate::verify::{Verification, VerificationEngine};

/// Why a run stopped without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stop requested from outside (dashboard or signal).
    External,
    /// Interrupted, and the operator chose not to continue.
    Interrupted,
    MaxSessions,
    WorkerUnavailable { reason: String },
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// All tasks done, verified (or force-accepted) and the checkpoint says COMPLETED.
    Completed { force_accepted: bool },
    Stopped(StopReason),
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub sessions_run: u32,
    pub last_session: u32,
    pub tasks_done: usize,
    pub tasks_total: usize,
    pub stop: RunStop,
}

/// Progress notifications for the operator.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    SessionStarted { session: u32 },
    SessionEnded { session: u32, outcome: &'a SessionOutcome },
    Verified { session: u32, verification: &'a Verification },
    /// The checkpoint claimed COMPLETED but the audit disagreed; status reset to WORKING.
    CompletionRejected { retry_count: u32 },
    Waiting { delay: Duration },
}

/// Collaborators and settings for [`run_loop`].
pub struct LoopDeps<'a, W: ?Sized, V, O: ?Sized> {
    pub paths: &'a A1Paths,
    pub config: &'a RunnerConfig,
    pub worker: &'a W,
    pub validator: &'a V,
    pub baseline: Option<&'a Baseline>,
    pub operator: &'a O,
    pub ctx: &'a RunContext,
}

#[instrument(skip_all, fields(root = %deps.paths.root.display(), max_sessions = deps.config.max_sessions))]
pub fn run_loop<W, V, O, F>(deps: LoopDeps<'_, W, V, O>, mut on_event: F) -> Result<LoopOutcome>
where
    W: Worker + ?Sized,
    V: Validator,
    O: Operator + ?Sized,
    F: FnMut(&LoopEvent<'_>),
{
    let LoopDeps {
        paths,
        config,
        worker,
        validator,
        baseline,
        operator,
        ctx,
    } = deps;
    let tasks = TaskStore::new(&paths.tasks_path);
    let checkpoints = CheckpointStore::new(&paths.checkpoint_path, &paths.checkpoints_dir);
    let queue = MessageQueue::new(&paths.queue_path);
    let engine = VerificationEngine::new(validator, baseline);
    let budget = Budget {
        window_size: config.context_window,
        threshold: config.context_threshold,
    };

    let mut sessions_run = 0u32;
    let mut last_session = checkpoints.session_number()?;

    let stop = loop {
        if ctx.stop_requested() {
            break RunStop::Stopped(StopReason::External);
        }
        if ctx.interrupted() {
            if operator.confirm_continue()? {
                ctx.clear_interrupt();
                ctx.log(LogKind::Session, "Operator chose to continue");
            } else {
                break RunStop::Stopped(StopReason::Interrupted);
            }
        }
        if sessions_run >= config.max_sessions {
            break RunStop::Stopped(StopReason::MaxSessions);
        }
        sessions_run += 1;

        let is_first = sessions_run == 1 && checkpoints.session_number()? == 0;
        let messages = queue.drain_unread()?;
        let checkpoint = checkpoints.start_session()?;
        let session = checkpoint.session;
        last_session = session;
        ctx.set_session(session);

        let prompt = build_prompt(&PromptInputs {
            is_first,
            session,
            project_dir: paths.root.display().to_string(),
            max_turns: config.max_turns,
            checkpoint_summary: checkpoint.summary(),
            tasks_summary: tasks.summary()?,
            messages,
            last_verification: checkpoint.last_verification.clone(),
        })?;

        info!(session, is_first, "session started");
        ctx.log(LogKind::Session, format!("Session #{session} started"));
        on_event(&LoopEvent::SessionStarted { session });

        let request = WorkerRequest {
            workdir: paths.root.clone(),
            prompt,
            max_turns: config.max_turns,
            log_path: paths.session_log(session),
        };
        let outcome = match run_session(worker, &request, budget, &checkpoints, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(unavailable) = err.downcast_ref::<WorkerUnavailableError>() {
                    warn!(reason = %unavailable.reason, "worker unavailable");
                    ctx.log(LogKind::Error, unavailable.to_string());
                    break RunStop::Stopped(StopReason::WorkerUnavailable {
                        reason: unavailable.reason.clone(),
                    });
                }
                return Err(err);
            }
        };
        on_event(&LoopEvent::SessionEnded {
            session,
            outcome: &outcome,
        });

        let mut checkpoint = checkpoints.end_session(SessionEnd {
            files_modified: outcome.files_touched.clone(),
            context_percent: Some(outcome.metrics.context_percent_rounded()),
            ..SessionEnd::default()
        })?;
        checkpoint.session_metrics = Some(outcome.metrics.clone());

        let doc = tasks.load()?;
        let verification = engine.verify(&checkpoint, &doc);
        checkpoint.last_verification = Some(verification.result.clone());
        for line in verification.summary.lines() {
            ctx.log(LogKind::Verify, line.trim_start());
        }
        on_event(&LoopEvent::Verified {
            session,
            verification: &verification,
        });

        let mut finished = None;
        if checkpoint.is_completed() {
            if verification.result.passed && doc.is_complete() {
                checkpoint.mark_completed(&timestamp());
                finished = Some(RunStop::Completed {
                    force_accepted: verification.result.force_accepted,
                });
            } else {
                checkpoint.status = CheckpointStatus::Working;
                let retry_count = verification.result.retry_count;
                ctx.log(
                    LogKind::Verify,
                    format!("Completion claim rejected (attempt {retry_count}), back to WORKING"),
                );
                on_event(&LoopEvent::CompletionRejected { retry_count });
            }
        }
        checkpoints.save(&mut checkpoint)?;
        if let Some(stop) = finished {
            break stop;
        }

        if sessions_run < config.max_sessions && !ctx.stop_requested() && !ctx.interrupted() {
            let delay = Duration::from_secs(config.session_delay_secs);
            on_event(&LoopEvent::Waiting { delay });
            ctx.wait_timeout(delay);
        }
    };

    let (tasks_done, tasks_total) = tasks.progress()?;
    info!(?stop, sessions_run, tasks_done, tasks_total, "run finished");
    ctx.log(
        LogKind::Session,
        format!("Run finished: {tasks_done}/{tasks_total} tasks, {sessions_run} sessions"),
    );
    Ok(LoopOutcome {
        sessions_run,
        last_session,
        tasks_done,
        tasks_total,
        stop,
    })
}
