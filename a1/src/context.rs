//! Shared run context: lifecycle-scoped state observed by the loop and the dashboard.
//!
//! One [`RunContext`] lives for as long as its owner (the CLI process or the
//! dashboard server). The loop writes metrics and log entries; other threads
//! read snapshots and may request a stop or an interrupt. Waiting callers are
//! woken on every request through the condition variable.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::events::LogKind;
use crate::core::types::SessionMetrics;
use crate::io::timestamp;

/// One line of the run's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub index: usize,
    pub ts: String,
    pub kind: LogKind,
    pub text: String,
}

/// Point-in-time copy of the run state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub running: bool,
    pub stop_requested: bool,
    pub session: u32,
    pub metrics: SessionMetrics,
    pub log_len: usize,
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    stop_requested: bool,
    interrupted: bool,
    session: u32,
    metrics: SessionMetrics,
    log: Vec<LogEntry>,
}

#[derive(Debug, Default)]
pub struct RunContext {
    state: Mutex<State>,
    changed: Condvar,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer leaves plain data behind; keep serving it.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a run as started. Returns false if one is already running.
    pub fn begin_run(&self) -> bool {
        let mut state = self.lock();
        if state.running {
            return false;
        }
        state.running = true;
        state.stop_requested = false;
        state.interrupted = false;
        state.metrics = SessionMetrics::default();
        true
    }

    pub fn end_run(&self) {
        let mut state = self.lock();
        state.running = false;
        state.interrupted = false;
        self.changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn request_stop(&self) {
        self.lock().stop_requested = true;
        self.changed.notify_all();
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    pub fn request_interrupt(&self) {
        self.lock().interrupted = true;
        self.changed.notify_all();
    }

    pub fn interrupted(&self) -> bool {
        self.lock().interrupted
    }

    /// Clear a handled interrupt so the next session can run.
    pub fn clear_interrupt(&self) {
        self.lock().interrupted = false;
    }

    pub fn set_session(&self, session: u32) {
        self.lock().session = session;
    }

    pub fn set_metrics(&self, metrics: &SessionMetrics) {
        self.lock().metrics = metrics.clone();
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.lock().metrics.clone()
    }

    pub fn log(&self, kind: LogKind, text: impl Into<String>) {
        let mut state = self.lock();
        let index = state.log.len();
        state.log.push(LogEntry {
            index,
            ts: timestamp(),
            kind,
            text: text.into(),
        });
    }

    /// Entries with `index >= since`.
    pub fn log_since(&self, since: usize) -> Vec<LogEntry> {
        let state = self.lock();
        state.log.get(since..).map(<[LogEntry]>::to_vec).unwrap_or_default()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.lock();
        RunSnapshot {
            running: state.running,
            stop_requested: state.stop_requested,
            session: state.session,
            metrics: state.metrics.clone(),
            log_len: state.log.len(),
        }
    }

    /// Sleep up to `timeout`, returning early (true) if a stop or interrupt is requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.stop_requested || state.interrupted {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}
