//! Read-only git adapter used by the repository-status check.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }

    /// Removed from the working tree or the index.
    pub fn is_deleted(&self) -> bool {
        !self.is_untracked() && self.code.contains('D')
    }
}

/// Changed/untracked counts for the working tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub changed: usize,
    pub untracked: usize,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if the working directory is the top of a git repository.
    pub fn is_repo(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    #[instrument(skip_all)]
    pub fn change_summary(&self) -> Result<ChangeSummary> {
        let entries = self.status_porcelain()?;
        let summary = summarize(&entries);
        debug!(changed = summary.changed, untracked = summary.untracked, "git status");
        Ok(summary)
    }

    /// Tracked paths that have been deleted since the last commit.
    pub fn deleted_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .status_porcelain()?
            .into_iter()
            .filter(StatusEntry::is_deleted)
            .map(|e| e.path)
            .collect())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn summarize(entries: &[StatusEntry]) -> ChangeSummary {
    let untracked = entries.iter().filter(|e| e.is_untracked()).count();
    ChangeSummary {
        changed: entries.len() - untracked,
        untracked,
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? notes.txt").expect("parse");
        assert!(e.is_untracked());
        assert_eq!(e.path, "notes.txt");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.rs -> new.rs").expect("parse");
        assert_eq!(e.code, "R ");
        assert_eq!(e.path, "new.rs");
    }

    #[test]
    fn deleted_entries_are_recognised() {
        let deleted: Vec<_> = [" D src/old.rs", "D  docs/gone.md", " M src/lib.rs", "?? D.txt"]
            .into_iter()
            .map(|l| parse_status_line(l).expect("parse"))
            .filter(StatusEntry::is_deleted)
            .map(|e| e.path)
            .collect();
        assert_eq!(deleted, ["src/old.rs", "docs/gone.md"]);
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_status_line("M").is_err());
    }

    #[test]
    fn summarizes_changed_and_untracked() {
        let entries: Vec<_> = [" M src/lib.rs", "A  src/new.rs", "?? scratch.txt"]
            .into_iter()
            .map(|l| parse_status_line(l).expect("parse"))
            .collect();
        assert_eq!(
            summarize(&entries),
            ChangeSummary {
                changed: 2,
                untracked: 1
            }
        );
    }

    #[test]
    fn plain_directory_is_not_a_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(!Git::new(temp.path()).is_repo());
    }
}
