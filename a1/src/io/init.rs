//! `.a1/` layout and project initialization.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{RunnerConfig, write_config};
use super::json::write_json_atomic;
use crate::core::checkpoint::Checkpoint;
use crate::core::tasks::TaskDocument;
use crate::io::timestamp;

/// All canonical paths within `.a1/` for a project root.
#[derive(Debug, Clone)]
pub struct A1Paths {
    pub root: PathBuf,
    pub a1_dir: PathBuf,
    pub config_path: PathBuf,
    pub tasks_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub baseline_path: PathBuf,
    pub queue_path: PathBuf,
    pub sessions_dir: PathBuf,
}

impl A1Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let a1_dir = root.join(".a1");
        Self {
            root: root.clone(),
            config_path: a1_dir.join("config.toml"),
            tasks_path: a1_dir.join("tasks.json"),
            checkpoint_path: a1_dir.join("checkpoint.json"),
            checkpoints_dir: a1_dir.join("checkpoints"),
            baseline_path: a1_dir.join("baseline.json"),
            queue_path: a1_dir.join("queue.json"),
            sessions_dir: a1_dir.join("sessions"),
            a1_dir,
        }
    }

    /// Raw worker output for one session.
    pub fn session_log(&self, session: u32) -> PathBuf {
        self.sessions_dir.join(format!("session_{session:03}.log"))
    }

    pub fn is_initialized(&self) -> bool {
        self.a1_dir.is_dir()
    }
}

/// Options for [`init_project`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing runner-owned files.
    pub force: bool,
}

/// Create `.a1/` scaffolding in `root`.
///
/// Fails if `.a1/` already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<A1Paths> {
    let paths = A1Paths::new(root);
    if paths.a1_dir.exists() && !paths.a1_dir.is_dir() {
        return Err(anyhow!("a1 init: .a1 exists but is not a directory"));
    }
    if paths.a1_dir.exists() && !options.force {
        return Err(anyhow!(
            "a1 init: .a1 already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.a1_dir)?;
    create_dir(&paths.checkpoints_dir)?;
    create_dir(&paths.sessions_dir)?;

    let now = timestamp();
    write_config(&paths.config_path, &RunnerConfig::default())?;
    write_json_atomic(&paths.tasks_path, &TaskDocument::default())?;
    write_json_atomic(&paths.checkpoint_path, &Checkpoint::initial(&now))?;
    if paths.baseline_path.exists() {
        fs::remove_file(&paths.baseline_path)
            .with_context(|| format!("remove {}", paths.baseline_path.display()))?;
    }

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
