//! Autonomous multi-session coding-agent runner.
//!
//! The runner drives an external coding agent through repeated bounded
//! sessions against a project's task list, checkpoints progress between
//! sessions, stops a session before the agent's context window overflows, and
//! independently verifies each session's work before accepting completion.
//!
//! - **[`core`]**: Pure logic (task queue, checkpoint record, event decoding,
//!   context guard, verification policy, prompts). No I/O.
//! - **[`io`]**: Side effects (the `.a1/` stores, child processes, validator
//!   checks, worker backends).
//!
//! Orchestration modules ([`session`], [`verify`], [`looping`], [`start`])
//! combine the two; [`context::RunContext`] is the state shared with observers
//! such as the dashboard.

pub mod context;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;
