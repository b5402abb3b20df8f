//! Pretty JSON documents written atomically (temp file + rename).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Serialize `value` as pretty JSON with a trailing newline and replace `path` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// What [`read_json`] found on disk.
#[derive(Debug)]
pub enum JsonDocument<T> {
    Missing,
    Parsed(T),
    /// The file exists but does not deserialize as `T`.
    Invalid(serde_json::Error),
}

/// Read a JSON document, separating "absent" from "present but unparsable".
///
/// Read errors other than "not found" propagate.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<JsonDocument<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(JsonDocument::Missing),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    Ok(match serde_json::from_str(&contents) {
        Ok(value) => JsonDocument::Parsed(value),
        Err(err) => JsonDocument::Invalid(err),
    })
}

/// Read a JSON document, treating a missing or unparsable file as absent.
///
/// Only for read paths: callers that write the document back must use
/// [`read_json`] so an unparsable file is never replaced by a default.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_json(path)? {
        JsonDocument::Missing => Ok(None),
        JsonDocument::Parsed(value) => Ok(Some(value)),
        JsonDocument::Invalid(err) => {
            warn!(path = %path.display(), err = %err, "ignoring unparsable document");
            Ok(None)
        }
    }
}
