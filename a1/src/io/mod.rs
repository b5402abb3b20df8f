//! I/O for runner commands: the `.a1/` stores, child processes, the
//! validator, and the worker backends.

pub mod anthropic;
pub mod baseline;
pub mod broker;
pub mod checkpoint_store;
pub mod config;
pub mod git;
pub mod init;
pub mod json;
pub mod lock;
pub mod operator;
pub mod process;
pub mod queue;
pub mod task_store;
pub mod validator;
pub mod worker;

use chrono::{SecondsFormat, Utc};

/// Current UTC time as an RFC 3339 string (second precision).
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
