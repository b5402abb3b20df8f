//! Shared application state for the dashboard server.

use std::path::PathBuf;
use std::sync::Arc;

use a1::context::RunContext;
use a1::io::init::A1Paths;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Root directory of the project (contains .a1/).
    pub project_dir: PathBuf,
    /// Live state of the run started from this server, if any.
    pub ctx: Arc<RunContext>,
}

impl AppState {
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            ctx: Arc::new(RunContext::new()),
        }
    }

    pub fn paths(&self) -> A1Paths {
        A1Paths::new(&self.project_dir)
    }
}
