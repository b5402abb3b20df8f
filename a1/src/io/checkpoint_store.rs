//! Current + archived checkpoint records.
//!
//! `.a1/checkpoint.json` holds the live record; every save also refreshes
//! `.a1/checkpoints/session_NNN.json` for the record's session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use super::json::{JsonDocument, read_json, read_json_lenient, write_json_atomic};
use super::lock::with_document_lock;
use super::timestamp;
use crate::core::checkpoint::{Checkpoint, SessionEnd};

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    current_path: PathBuf,
    archive_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(current_path: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            current_path: current_path.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn archive_path(&self, session: u32) -> PathBuf {
        self.archive_dir.join(format!("session_{session:03}.json"))
    }

    /// Load the current record. A missing file yields the initial record.
    ///
    /// A file that cannot be read as a record at all is replaced by the latest
    /// archive entry, so the session counter never runs backwards.
    pub fn load(&self) -> Result<Checkpoint> {
        match read_json::<Checkpoint>(&self.current_path)? {
            JsonDocument::Parsed(checkpoint) => Ok(checkpoint),
            JsonDocument::Missing => Ok(Checkpoint::initial(&timestamp())),
            JsonDocument::Invalid(err) => {
                let latest = self.latest_archived()?;
                warn!(
                    path = %self.current_path.display(),
                    err = %err,
                    recovered_session = latest.as_ref().map(|cp| cp.session),
                    "unparsable checkpoint, falling back to the latest archive"
                );
                Ok(latest.unwrap_or_else(|| Checkpoint::initial(&timestamp())))
            }
        }
    }

    /// Stamp `updated_at`, cap decisions, and write the current and archive records.
    #[instrument(skip_all, fields(session = checkpoint.session))]
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.updated_at = timestamp();
        checkpoint.truncate_decisions();
        write_json_atomic(&self.current_path, checkpoint)?;
        write_json_atomic(&self.archive_path(checkpoint.session), checkpoint)?;
        debug!("checkpoint saved");
        Ok(())
    }

    /// Load, change and save the current record under the document lock.
    pub fn update(&self, f: impl FnOnce(&mut Checkpoint)) -> Result<Checkpoint> {
        with_document_lock(&self.current_path, || {
            let mut checkpoint = self.load()?;
            f(&mut checkpoint);
            self.save(&mut checkpoint)?;
            Ok(checkpoint)
        })
    }

    pub fn start_session(&self) -> Result<Checkpoint> {
        let now = timestamp();
        self.update(|checkpoint| checkpoint.start_session(&now))
    }

    pub fn end_session(&self, end: SessionEnd) -> Result<Checkpoint> {
        let now = timestamp();
        self.update(|checkpoint| checkpoint.end_session(end, &now))
    }

    pub fn mark_completed(&self) -> Result<Checkpoint> {
        let now = timestamp();
        self.update(|checkpoint| checkpoint.mark_completed(&now))
    }

    pub fn is_completed(&self) -> Result<bool> {
        Ok(self.load()?.is_completed())
    }

    pub fn session_number(&self) -> Result<u32> {
        Ok(self.load()?.session)
    }

    pub fn summary(&self) -> Result<String> {
        Ok(self.load()?.summary())
    }

    /// Session numbers with an archive entry, ascending.
    pub fn archived_sessions(&self) -> Result<Vec<u32>> {
        if !self.archive_dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)
            .with_context(|| format!("read directory {}", self.archive_dir.display()))?
        {
            let entry = entry.context("read archive entry")?;
            let name = entry.file_name();
            let Some(number) = name
                .to_str()
                .and_then(|n| n.strip_prefix("session_"))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            sessions.push(number);
        }
        sessions.sort_unstable();
        Ok(sessions)
    }

    pub fn load_archived(&self, session: u32) -> Result<Option<Checkpoint>> {
        read_json_lenient(&self.archive_path(session))
    }

    /// Most recent readable archive entry.
    pub fn latest_archived(&self) -> Result<Option<Checkpoint>> {
        for session in self.archived_sessions()?.into_iter().rev() {
            if let Some(checkpoint) = self.load_archived(session)? {
                return Ok(Some(checkpoint));
            }
        }
        Ok(None)
    }
}
