//! CLI command implementations. Each returns the process exit code.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use a1::context::RunContext;
use a1::core::tasks::TaskUpdate;
use a1::core::types::CheckReports;
use a1::exit_codes;
use a1::io::checkpoint_store::CheckpointStore;
use a1::io::config::{ConfigOverrides, load_config};
use a1::io::init::{A1Paths, InitOptions, init_project};
use a1::io::operator::StdinOperator;
use a1::io::queue::MessageQueue;
use a1::io::task_store::TaskStore;
use a1::io::timestamp;
use a1::io::validator::{ProjectValidator, Validator};
use a1::io::worker::{TerminateReason, WorkerExit};
use a1::looping::{LoopEvent, LoopOutcome, RunStop, StopReason};
use a1::start::start_run;
use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::{Command, TaskCommand};

pub(crate) fn dispatch(root: &Path, command: Command) -> Result<i32> {
    let paths = A1Paths::new(root);
    if !matches!(command, Command::Init { .. }) && !paths.is_initialized() {
        bail!("{} is not initialized (run `a1 init`)", root.display());
    }
    match command {
        Command::Init { force } => init(root, force),
        Command::Task { action } => task(&paths, action),
        Command::Tasks => {
            println!("{}", TaskStore::new(&paths.tasks_path).summary()?);
            Ok(exit_codes::OK)
        }
        Command::Think { text } => {
            TaskStore::new(&paths.tasks_path).add_raw_thought(&text)?;
            println!("Noted.");
            Ok(exit_codes::OK)
        }
        Command::Message { text } => {
            MessageQueue::new(&paths.queue_path).enqueue(&text)?;
            println!("Queued for the next session.");
            Ok(exit_codes::OK)
        }
        Command::Status { validate } => status(&paths, validate),
        Command::Validate => validate(&paths),
        Command::Log { session } => log(&paths, session),
        Command::Start {
            max_sessions,
            max_turns,
            provider,
            model,
        } => start(
            &paths,
            ConfigOverrides {
                provider,
                model,
                max_sessions,
                max_turns,
                ..ConfigOverrides::default()
            },
        ),
    }
}

fn init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("Initialized {}", paths.a1_dir.display());
    Ok(exit_codes::OK)
}

fn task(paths: &A1Paths, action: TaskCommand) -> Result<i32> {
    let store = TaskStore::new(&paths.tasks_path);
    match action {
        TaskCommand::Add {
            title,
            description,
            criteria,
        } => {
            let mut task = store.add(&title, &description)?;
            if criteria.is_some() {
                task = store.update(
                    &task.id,
                    &TaskUpdate {
                        success_criteria: criteria,
                        ..TaskUpdate::default()
                    },
                )?;
            }
            println!("Added {}: {} (priority {})", task.id, task.title, task.priority);
        }
        TaskCommand::Done { id } => {
            let task = store.complete(&id)?;
            println!("Done {}: {}", task.id, task.title);
        }
        TaskCommand::Reorder { ids } => {
            store.reorder(&ids)?;
            println!("Reordered {} tasks", ids.len());
        }
    }
    Ok(exit_codes::OK)
}

fn print_reports(reports: &CheckReports) {
    for (name, report) in reports {
        println!("  {} {name}: {}", report.result.icon(), report.message);
        if let Some(details) = &report.details {
            for line in details.lines().take(10) {
                println!("      {line}");
            }
        }
    }
}

fn status(paths: &A1Paths, run_validator: bool) -> Result<i32> {
    let checkpoints = CheckpointStore::new(&paths.checkpoint_path, &paths.checkpoints_dir);
    let checkpoint = checkpoints.load()?;
    let (done, total) = TaskStore::new(&paths.tasks_path).progress()?;

    println!("{}", checkpoint.summary());
    println!();
    println!("Tasks: {done}/{total} done");
    if let Some(metrics) = &checkpoint.session_metrics {
        println!(
            "Last session: {} tokens in, {} out, {} tools, {}s",
            metrics.tokens_in, metrics.tokens_out, metrics.tools_used, metrics.duration_secs
        );
    }
    if let Some(verification) = &checkpoint.last_verification {
        let verdict = if verification.force_accepted {
            "force-accepted"
        } else if verification.passed {
            "passed"
        } else {
            "failed"
        };
        println!(
            "Last verification: {verdict} (retry {})",
            verification.retry_count
        );
        for issue in &verification.blocking_issues {
            println!("  BLOCKING: {issue}");
        }
    }
    if run_validator {
        let cfg = load_config(&paths.config_path)?;
        println!();
        println!("Validation:");
        print_reports(&ProjectValidator::new(&paths.root, cfg.validator).run_all());
    }
    Ok(exit_codes::OK)
}

fn validate(paths: &A1Paths) -> Result<i32> {
    let cfg = load_config(&paths.config_path)?;
    let reports = ProjectValidator::new(&paths.root, cfg.validator).run_all();
    print_reports(&reports);
    if reports.values().any(|r| r.is_fail()) {
        return Ok(exit_codes::INCOMPLETE);
    }
    Ok(exit_codes::OK)
}

fn log(paths: &A1Paths, session: Option<u32>) -> Result<i32> {
    let session = match session {
        Some(n) => n,
        None => CheckpointStore::new(&paths.checkpoint_path, &paths.checkpoints_dir)
            .session_number()?,
    };
    if session == 0 {
        bail!("no sessions have run yet");
    }
    let path = paths.session_log(session);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    print!("{contents}");
    Ok(exit_codes::OK)
}

/// Turn Ctrl-C into an interrupt request on `ctx` for the rest of the process.
fn install_interrupt_handler(ctx: Arc<RunContext>) {
    let spawned = thread::Builder::new()
        .name("a1-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(err = %e, "failed to build signal runtime");
                    return;
                }
            };
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    debug!("interrupt received");
                    ctx.request_interrupt();
                }
            });
        });
    if let Err(e) = spawned {
        warn!(err = %e, "failed to spawn signal thread");
    }
}

fn describe_exit(exit: &WorkerExit) -> String {
    match exit {
        WorkerExit::Finished {
            exit_code: Some(code),
        } => format!("exit {code}"),
        WorkerExit::Finished { exit_code: None } => "killed by signal".to_string(),
        WorkerExit::Terminated(TerminateReason::ContextBudget) => "context budget".to_string(),
        WorkerExit::Terminated(TerminateReason::StopRequested) => "stopped".to_string(),
        WorkerExit::Terminated(TerminateReason::Interrupted) => "interrupted".to_string(),
    }
}

fn print_event(event: &LoopEvent<'_>) {
    match event {
        LoopEvent::SessionStarted { session } => {
            println!("{}", "-".repeat(60));
            println!(">> SESSION #{session} started at {}", timestamp());
            println!("{}", "-".repeat(60));
        }
        LoopEvent::SessionEnded { session, outcome } => {
            let mut line = format!(
                "-- Session #{session} ended (duration: {}s, {}",
                outcome.metrics.duration_secs,
                describe_exit(&outcome.exit)
            );
            if outcome.checkpointed {
                line.push_str(&format!(
                    ", context: {}% [AUTO-CHECKPOINT]",
                    outcome.metrics.context_percent_rounded()
                ));
            }
            line.push(')');
            println!("{line}");
        }
        LoopEvent::Verified { verification, .. } => println!("{}", verification.summary),
        LoopEvent::CompletionRejected { retry_count } => {
            println!("[!] Agent marked COMPLETED but verification failed (attempt {retry_count})");
            println!("    Resetting to WORKING for the next session");
        }
        LoopEvent::Waiting { delay } => {
            println!("[..] Next session in {} seconds (Ctrl+C to pause)", delay.as_secs());
        }
    }
}

fn print_summary(outcome: &LoopOutcome) {
    println!("{}", "=".repeat(60));
    match &outcome.stop {
        RunStop::Completed {
            force_accepted: false,
        } => println!("[OK] ALL TASKS COMPLETED + VERIFIED"),
        RunStop::Completed {
            force_accepted: true,
        } => println!("[OK] ALL TASKS COMPLETED + FORCE ACCEPTED"),
        RunStop::Stopped(StopReason::External) => println!("Stopped on request"),
        RunStop::Stopped(StopReason::Interrupted) => println!("Stopped by operator"),
        RunStop::Stopped(StopReason::MaxSessions) => println!("Session budget exhausted"),
        RunStop::Stopped(StopReason::WorkerUnavailable { reason }) => {
            println!("Worker unavailable: {reason}");
        }
    }
    println!("{}", "=".repeat(60));
    println!("Progress: {}/{} tasks completed", outcome.tasks_done, outcome.tasks_total);
    println!("Sessions: {}", outcome.sessions_run);
}

fn start(paths: &A1Paths, overrides: ConfigOverrides) -> Result<i32> {
    let ctx = Arc::new(RunContext::new());
    install_interrupt_handler(Arc::clone(&ctx));

    let outcome = start_run(&paths.root, &overrides, &ctx, &StdinOperator, print_event)?;
    print_summary(&outcome);
    Ok(match outcome.stop {
        RunStop::Completed { .. } => exit_codes::OK,
        RunStop::Stopped(StopReason::Interrupted) => exit_codes::INTERRUPTED,
        RunStop::Stopped(StopReason::WorkerUnavailable { .. }) => exit_codes::UNAVAILABLE,
        RunStop::Stopped(StopReason::External | StopReason::MaxSessions) => exit_codes::INCOMPLETE,
    })
}
