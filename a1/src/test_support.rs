//! Scripted collaborators and project fixtures for tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use crate::core::checkpoint::CheckpointStatus;
use crate::core::events::WorkerEvent;
use crate::core::tasks::TaskStatus;
use crate::core::types::{CheckReport, CheckReports};
use crate::io::checkpoint_store::CheckpointStore;
use crate::io::init::{A1Paths, InitOptions, init_project};
use crate::io::operator::Operator;
use crate::io::queue::MessageQueue;
use crate::io::task_store::TaskStore;
use crate::io::validator::Validator;
use crate::io::worker::{
    EventSink, Flow, Worker, WorkerExit, WorkerRequest, WorkerUnavailableError, terminated,
};

type Effect = Box<dyn Fn(&Path)>;

/// An initialized project in a temporary directory.
pub struct TestProject {
    _temp: TempDir,
    pub paths: A1Paths,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions::default()).expect("init");
        Self { _temp: temp, paths }
    }

    /// A project with one pending task per title.
    pub fn with_tasks(titles: &[&str]) -> Self {
        let project = Self::new();
        for title in titles {
            project.tasks().add(title, "").expect("add task");
        }
        project
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn tasks(&self) -> TaskStore {
        TaskStore::new(&self.paths.tasks_path)
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(&self.paths.checkpoint_path, &self.paths.checkpoints_dir)
    }

    pub fn queue(&self) -> MessageQueue {
        MessageQueue::new(&self.paths.queue_path)
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// What an agent does when it finishes everything: mark every task done and
/// claim COMPLETED in the checkpoint.
pub fn complete_everything(root: &Path) {
    let paths = A1Paths::new(root);
    let tasks = TaskStore::new(&paths.tasks_path);
    for task in tasks.list(None).expect("list") {
        if task.status != TaskStatus::Done {
            tasks.complete(&task.id).expect("complete");
        }
    }
    let store = CheckpointStore::new(&paths.checkpoint_path, &paths.checkpoints_dir);
    store
        .update(|checkpoint| checkpoint.status = CheckpointStatus::Completed)
        .expect("claim completion");
}

/// One scripted worker session.
#[derive(Default)]
pub struct ScriptedSession {
    events: Vec<WorkerEvent>,
    effect: Option<Effect>,
    unavailable: Option<String>,
    exit_code: i32,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The worker binary or service cannot be reached.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn event(mut self, event: WorkerEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Side effect on the project directory, applied before events are streamed.
    pub fn effect(mut self, effect: impl Fn(&Path) + 'static) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }
}

/// Worker that replays scripted sessions in order.
///
/// Once the script is exhausted every further session finishes immediately.
pub struct ScriptedWorker {
    sessions: RefCell<VecDeque<ScriptedSession>>,
    requests: RefCell<Vec<WorkerRequest>>,
}

impl ScriptedWorker {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: RefCell::new(sessions.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.prompt.clone()).collect()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Worker for ScriptedWorker {
    fn run(&self, request: &WorkerRequest, sink: &mut dyn EventSink) -> Result<WorkerExit> {
        self.requests.borrow_mut().push(request.clone());
        let session = self.sessions.borrow_mut().pop_front().unwrap_or_default();
        if let Some(reason) = session.unavailable {
            return Err(WorkerUnavailableError { reason }.into());
        }
        if let Some(effect) = &session.effect {
            effect(&request.workdir);
        }
        for event in &session.events {
            if let Flow::Terminate(reason) = sink.on_event(event) {
                return Ok(terminated(sink, reason, None));
            }
        }
        if let Flow::Terminate(reason) = sink.poll() {
            return Ok(terminated(sink, reason, None));
        }
        let exit_code = Some(session.exit_code);
        sink.on_event(&WorkerEvent::Done { exit_code });
        Ok(WorkerExit::Finished { exit_code })
    }
}

/// Validator returning scripted `run_all` results in order, then all-passing reports.
pub struct ScriptedValidator {
    runs: RefCell<VecDeque<CheckReports>>,
    calls: Cell<usize>,
}

impl ScriptedValidator {
    pub fn passing() -> Self {
        Self::with_runs(Vec::new())
    }

    pub fn with_runs(runs: Vec<CheckReports>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn all_ok() -> CheckReports {
        ["syntax", "tests", "lint", "build"]
            .into_iter()
            .map(|name| (name.to_string(), CheckReport::ok("ok")))
            .collect()
    }
}

impl Validator for ScriptedValidator {
    fn run_all(&self) -> CheckReports {
        self.calls.set(self.calls.get() + 1);
        self.runs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(Self::all_ok)
    }

    fn check_files_exist(&self, paths: &[String]) -> CheckReport {
        CheckReport::ok(format!("All {} files exist", paths.len()))
    }

    fn check_criteria(&self, _criteria: &str) -> CheckReport {
        CheckReport::skip("Cannot auto-verify")
    }
}

/// Operator answering continue prompts from a script; declines once it runs out.
pub struct ScriptedOperator {
    answers: RefCell<VecDeque<bool>>,
    asked: Cell<usize>,
}

impl ScriptedOperator {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().copied().collect()),
            asked: Cell::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.get()
    }
}

impl Operator for ScriptedOperator {
    fn confirm_continue(&self) -> Result<bool> {
        self.asked.set(self.asked.get() + 1);
        Ok(self.answers.borrow_mut().pop_front().unwrap_or(false))
    }
}
