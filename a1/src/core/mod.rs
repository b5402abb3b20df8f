//! Deterministic, pure logic shared by the runner core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.
//! Timestamps are passed in by callers.

pub mod checkpoint;
pub mod events;
pub mod guard;
pub mod lenient;
pub mod prompt;
pub mod tasks;
pub mod types;
pub mod verification;
