//! Stable exit codes for `a1` CLI commands.

/// Command succeeded, or the run completed with verified work.
pub const OK: i32 = 0;
/// Invalid project, config or arguments, or an internal error.
pub const INVALID: i32 = 1;
/// The run stopped before completion (session budget exhausted or external stop).
/// `a1 validate` also uses it when a check fails.
pub const INCOMPLETE: i32 = 2;
/// The worker could not be reached.
pub const UNAVAILABLE: i32 = 3;
/// The operator interrupted the run and chose to stop.
pub const INTERRUPTED: i32 = 130;
