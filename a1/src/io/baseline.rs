//! Persistence for the pre-run validator baseline (`.a1/baseline.json`).

use std::path::Path;

use anyhow::Result;
use tracing::info;

use super::json::{read_json_lenient, write_json_atomic};
use crate::core::verification::Baseline;

pub fn load_baseline(path: &Path) -> Result<Option<Baseline>> {
    read_json_lenient(path)
}

/// Return the stored baseline, or capture one with `capture` and store it.
///
/// An existing baseline is never overwritten.
pub fn load_or_capture(path: &Path, capture: impl FnOnce() -> Baseline) -> Result<Baseline> {
    if let Some(existing) = load_baseline(path)? {
        return Ok(existing);
    }
    let baseline = capture();
    info!(checks = baseline.checks.len(), "captured validator baseline");
    write_json_atomic(path, &baseline)?;
    Ok(baseline)
}
