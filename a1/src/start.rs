//! Orchestration for `a1 start`: resolve config, pick the worker, capture the
//! baseline and hand over to the session loop.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::io::anthropic::AnthropicClient;
use crate::io::broker::BrokerWorker;
use crate::io::config::{API_KEY_ENV, ConfigOverrides, Provider, RunnerConfig, load_config};
use crate::io::init::A1Paths;
use crate::io::operator::Operator;
use crate::io::task_store::TaskStore;
use crate::io::validator::ProjectValidator;
use crate::io::worker::{ClaudeCliWorker, Worker, WorkerUnavailableError};
use crate::looping::{LoopDeps, LoopEvent, LoopOutcome, RunStop, StopReason, run_loop};
use crate::verify::capture_baseline;

/// Clears the running flag however the run ends.
struct RunningGuard<'a>(&'a RunContext);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.end_run();
    }
}

/// Load `.a1/config.toml` and layer env and command-line values over it.
pub fn resolve_config(paths: &A1Paths, overrides: &ConfigOverrides) -> Result<RunnerConfig> {
    load_config(&paths.config_path)?.resolve(overrides, std::env::var(API_KEY_ENV).ok())
}

/// Build the worker for the configured provider.
pub fn build_worker(cfg: &RunnerConfig) -> Result<Box<dyn Worker + Send>> {
    match cfg.provider {
        Provider::ClaudeCli => Ok(Box::new(ClaudeCliWorker::new(
            cfg.claude_binary.clone(),
            cfg.model.clone(),
            Duration::from_secs(cfg.termination_grace_secs),
        ))),
        Provider::ClaudeApi => {
            let client = AnthropicClient::new(cfg.api_key.clone(), cfg.model.clone())?;
            Ok(Box::new(BrokerWorker::new(client)))
        }
    }
}

/// Run sessions in `root` until completion or stop.
///
/// Fails if the project is not initialized, has no open tasks, or `ctx`
/// already has a run in progress.
pub fn start_run<O, F>(
    root: &Path,
    overrides: &ConfigOverrides,
    ctx: &RunContext,
    operator: &O,
    on_event: F,
) -> Result<LoopOutcome>
where
    O: Operator + ?Sized,
    F: FnMut(&LoopEvent<'_>),
{
    let paths = A1Paths::new(root);
    if !paths.is_initialized() {
        bail!("{} is not initialized (run `a1 init`)", root.display());
    }
    let cfg = resolve_config(&paths, overrides)?;
    let tasks = TaskStore::new(&paths.tasks_path).load()?;
    if !tasks.has_open_work() {
        bail!("no pending tasks (add one with `a1 task add`)");
    }

    if !ctx.begin_run() {
        bail!("a run is already in progress");
    }
    let _running = RunningGuard(ctx);
    info!(
        root = %root.display(),
        provider = cfg.provider.as_str(),
        max_sessions = cfg.max_sessions,
        "starting run"
    );

    let worker = match build_worker(&cfg) {
        Ok(worker) => worker,
        Err(err) => {
            let Some(unavailable) = err.downcast_ref::<WorkerUnavailableError>() else {
                return Err(err);
            };
            let (tasks_done, tasks_total) = tasks.progress();
            return Ok(LoopOutcome {
                sessions_run: 0,
                last_session: 0,
                tasks_done,
                tasks_total,
                stop: RunStop::Stopped(StopReason::WorkerUnavailable {
                    reason: unavailable.reason.clone(),
                }),
            });
        }
    };

    let validator = ProjectValidator::new(root, cfg.validator.clone());
    let baseline = capture_baseline(&validator, &paths.baseline_path)?;
    debug!(checks = baseline.checks.len(), "baseline ready");

    run_loop(
        LoopDeps {
            paths: &paths,
            config: &cfg,
            worker: worker.as_ref(),
            validator: &validator,
            baseline: Some(&baseline),
            operator,
            ctx,
        },
        on_event,
    )
}
