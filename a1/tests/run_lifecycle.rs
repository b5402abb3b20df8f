//! Loop-level tests for multi-session runs.
//!
//! These drive `run_loop` with scripted workers against the real project
//! validator, so completion claims are checked against the files on disk.

use std::fs;

use a1::context::RunContext;
use a1::core::checkpoint::CheckpointStatus;
use a1::core::events::{LogKind, ToolCall, Usage, WorkerEvent};
use a1::io::config::RunnerConfig;
use a1::io::validator::ProjectValidator;
use a1::looping::{LoopDeps, LoopEvent, LoopOutcome, RunStop, run_loop};
use a1::test_support::{
    ScriptedOperator, ScriptedSession, ScriptedWorker, TestProject, complete_everything,
};

fn config(max_sessions: u32) -> RunnerConfig {
    RunnerConfig {
        max_sessions,
        session_delay_secs: 0,
        ..RunnerConfig::default()
    }
}

fn write_notes() -> WorkerEvent {
    WorkerEvent::ToolUse {
        id: "toolu_1".to_string(),
        call: ToolCall::WriteFile {
            file_path: "notes/design.md".to_string(),
            content: "# Design\n".to_string(),
        },
    }
}

fn run(
    project: &TestProject,
    cfg: &RunnerConfig,
    worker: &ScriptedWorker,
    ctx: &RunContext,
    events: &mut Vec<String>,
) -> LoopOutcome {
    let validator = ProjectValidator::new(project.root(), cfg.validator.clone());
    run_loop(
        LoopDeps {
            paths: &project.paths,
            config: cfg,
            worker,
            validator: &validator,
            baseline: None,
            operator: &ScriptedOperator::new(&[]),
            ctx,
        },
        |event| {
            let label = match event {
                LoopEvent::SessionStarted { session } => format!("start {session}"),
                LoopEvent::SessionEnded { session, .. } => format!("end {session}"),
                LoopEvent::Verified { verification, .. } => {
                    format!("verified passed={}", verification.result.passed)
                }
                LoopEvent::CompletionRejected { retry_count } => format!("rejected {retry_count}"),
                LoopEvent::Waiting { .. } => "waiting".to_string(),
            };
            events.push(label);
        },
    )
    .expect("run loop")
}

/// Session 1 claims completion but the file it reported writing is missing;
/// session 2 creates it and the claim is accepted.
#[test]
fn missing_written_file_blocks_completion_until_it_exists() {
    let project = TestProject::with_tasks(&["write design notes"]);
    let worker = ScriptedWorker::new(vec![
        ScriptedSession::new()
            .effect(complete_everything)
            .event(write_notes()),
        ScriptedSession::new().effect(|root| {
            fs::create_dir_all(root.join("notes")).expect("mkdir");
            fs::write(root.join("notes/design.md"), "# Design\n").expect("write");
            complete_everything(root);
        }),
    ]);
    let mut events = Vec::new();
    let outcome = run(&project, &config(5), &worker, &RunContext::new(), &mut events);

    assert_eq!(outcome.stop, RunStop::Completed { force_accepted: false });
    assert_eq!(outcome.sessions_run, 2);
    assert_eq!(
        events,
        vec![
            "start 1",
            "end 1",
            "verified passed=false",
            "rejected 1",
            "waiting",
            "start 2",
            "end 2",
            "verified passed=true",
        ]
    );

    let second_prompt = &worker.prompts()[1];
    assert!(second_prompt.contains("VERIFICATION FAILED (attempt 1/3)"));
    assert!(second_prompt.contains("notes/design.md"));

    let checkpoint = project.checkpoints().load().expect("checkpoint");
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert!(checkpoint.files_modified.contains("notes/design.md"));
    let verification = checkpoint.last_verification.expect("verification");
    assert!(verification.passed);
    assert_eq!(verification.retry_count, 0);
}

/// A session that overflows the context budget is cut short, and the next
/// session resumes from the auto-checkpoint.
#[test]
fn overflowing_session_is_resumed_from_checkpoint() {
    let project = TestProject::with_tasks(&["big refactor"]);
    let worker = ScriptedWorker::new(vec![
        ScriptedSession::new()
            .event(WorkerEvent::Text("reading the codebase".to_string()))
            .event(WorkerEvent::Usage(Usage {
                input_tokens: Some(180_000),
                ..Usage::default()
            }))
            .event(WorkerEvent::Text("never seen".to_string())),
        ScriptedSession::new().effect(complete_everything),
    ]);
    let ctx = RunContext::new();
    let mut events = Vec::new();
    let outcome = run(&project, &config(5), &worker, &ctx, &mut events);

    assert_eq!(outcome.stop, RunStop::Completed { force_accepted: false });
    assert_eq!(outcome.sessions_run, 2);

    let second_prompt = &worker.prompts()[1];
    assert!(second_prompt.starts_with("AUTONOMOUS MODE - Continuing Session #2"));
    assert!(second_prompt.contains("Auto-checkpoint at 90% context"));

    let texts: Vec<String> = ctx
        .log_since(0)
        .into_iter()
        .filter(|entry| entry.kind == LogKind::Text)
        .map(|entry| entry.text)
        .collect();
    assert_eq!(texts, vec!["reading the codebase"]);
    assert!(
        ctx.log_since(0)
            .iter()
            .any(|entry| entry.kind == LogKind::Session && entry.text == "Worker exited (signal)")
    );
}

/// Messages queued before a session land in its prompt and are marked read.
#[test]
fn operator_input_reaches_the_next_session() {
    let project = TestProject::with_tasks(&["one"]);
    project.queue().enqueue("use the existing logger").expect("enqueue");
    let worker = ScriptedWorker::new(vec![ScriptedSession::new().effect(complete_everything)]);
    let mut events = Vec::new();
    run(&project, &config(1), &worker, &RunContext::new(), &mut events);

    assert!(worker.prompts()[0].contains("use the existing logger"));
    assert!(project.queue().list().expect("queue").iter().all(|m| m.read));
}
