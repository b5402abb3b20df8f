//! Durable task queue backed by `.a1/tasks.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::json::{JsonDocument, read_json, write_json_atomic};
use super::lock::with_document_lock;
use super::timestamp;
use crate::core::tasks::{RawThought, Task, TaskDocument, TaskStatus, TaskUpdate};

#[derive(Debug, Error)]
#[error("task not found: {id}")]
pub struct TaskNotFoundError {
    pub id: String,
}

/// Task store over a single JSON document.
///
/// Every operation re-reads the document so edits made by the agent between
/// calls are never clobbered by stale in-memory state.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. Missing or unparsable files yield an empty document.
    ///
    /// Legacy tasks without priorities are migrated and the file re-saved.
    pub fn load(&self) -> Result<TaskDocument> {
        match read_json::<TaskDocument>(&self.path)? {
            JsonDocument::Missing => Ok(TaskDocument::default()),
            JsonDocument::Invalid(err) => {
                warn!(path = %self.path.display(), err = %err, "ignoring unparsable task document");
                Ok(TaskDocument::default())
            }
            JsonDocument::Parsed(mut doc) => {
                if doc.migrate_priorities() {
                    info!(path = %self.path.display(), "migrating legacy task priorities");
                    doc = self.modify(|doc| Ok(doc.clone()))?;
                }
                Ok(doc)
            }
        }
    }

    pub fn save(&self, doc: &TaskDocument) -> Result<()> {
        debug!(path = %self.path.display(), tasks = doc.tasks.len(), "writing tasks");
        write_json_atomic(&self.path, doc)
    }

    /// Load, change and save under the document lock.
    ///
    /// A document that exists but cannot be parsed is left untouched and the
    /// change fails, so hand edits are never replaced by an empty task list.
    fn modify<T>(&self, f: impl FnOnce(&mut TaskDocument) -> Result<T>) -> Result<T> {
        with_document_lock(&self.path, || {
            let mut doc = match read_json::<TaskDocument>(&self.path)? {
                JsonDocument::Missing => TaskDocument::default(),
                JsonDocument::Parsed(doc) => doc,
                JsonDocument::Invalid(err) => {
                    return Err(err).with_context(|| {
                        format!(
                            "{} is not a valid task document; fix it before changing tasks",
                            self.path.display()
                        )
                    });
                }
            };
            doc.migrate_priorities();
            let out = f(&mut doc)?;
            self.save(&doc)?;
            Ok(out)
        })
    }

    #[instrument(skip_all)]
    pub fn add(&self, title: &str, description: &str) -> Result<Task> {
        let now = timestamp();
        self.modify(|doc| Ok(doc.add(title, description, &now)))
    }

    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        Ok(self.load()?.list(status))
    }

    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.load()?.get(id).cloned())
    }

    pub fn update(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        self.modify(|doc| {
            doc.update(id, update).ok_or_else(|| {
                TaskNotFoundError {
                    id: id.to_string(),
                }
                .into()
            })
        })
    }

    pub fn start(&self, id: &str) -> Result<Task> {
        self.update(
            id,
            &TaskUpdate {
                status: Some(TaskStatus::InProgress),
                ..TaskUpdate::default()
            },
        )
    }

    pub fn complete(&self, id: &str) -> Result<Task> {
        self.update(
            id,
            &TaskUpdate {
                status: Some(TaskStatus::Done),
                completed_at: Some(timestamp()),
                ..TaskUpdate::default()
            },
        )
    }

    pub fn reorder(&self, ids: &[String]) -> Result<()> {
        self.modify(|doc| {
            if let Some(missing) = ids.iter().find(|id| doc.get(id).is_none()) {
                return Err(TaskNotFoundError {
                    id: missing.clone(),
                }
                .into());
            }
            doc.reorder(ids);
            Ok(())
        })
    }

    pub fn next_task(&self) -> Result<Option<Task>> {
        Ok(self.load()?.next_task().cloned())
    }

    pub fn progress(&self) -> Result<(usize, usize)> {
        Ok(self.load()?.progress())
    }

    pub fn summary(&self) -> Result<String> {
        Ok(self.load()?.summary())
    }

    pub fn add_raw_thought(&self, text: &str) -> Result<()> {
        let now = timestamp();
        self.modify(|doc| {
            doc.add_raw_thought(text, &now);
            Ok(())
        })
    }

    pub fn raw_thoughts(&self) -> Result<Vec<RawThought>> {
        Ok(self.load()?.raw_thoughts)
    }

    pub fn clear_raw_thoughts(&self) -> Result<()> {
        self.modify(|doc| {
            doc.raw_thoughts.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store() -> (tempfile::TempDir, TaskStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(temp.path().join(".a1").join("tasks.json"));
        (temp, store)
    }

    #[test]
    fn missing_file_is_empty_document() {
        let (_temp, store) = store();
        assert_eq!(store.load().expect("load"), TaskDocument::default());
        assert_eq!(store.progress().expect("progress"), (0, 0));
    }

    #[test]
    fn add_persists_across_instances() {
        let (_temp, store) = store();
        store.add("first", "do it").expect("add");
        store.add("second", "").expect("add");

        let reopened = TaskStore::new(store.path());
        let tasks = reopened.list(None).expect("list");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "first");
        assert_eq!(tasks[1].id, "task_002");
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let (_temp, store) = store();
        let err = store.start("task_404").unwrap_err();
        let not_found = err.downcast_ref::<TaskNotFoundError>().expect("typed error");
        assert_eq!(not_found.id, "task_404");
    }

    #[test]
    fn complete_stamps_completion_time() {
        let (_temp, store) = store();
        let task = store.add("ship", "").expect("add");
        let done = store.complete(&task.id).expect("complete");
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.completed_at.is_some());
        assert_eq!(store.progress().expect("progress"), (1, 1));
    }

    #[test]
    fn reorder_rejects_unknown_ids_without_writing() {
        let (_temp, store) = store();
        store.add("a", "").expect("add");
        store.add("b", "").expect("add");
        let err = store
            .reorder(&["task_002".to_string(), "task_009".to_string()])
            .unwrap_err();
        assert!(err.downcast_ref::<TaskNotFoundError>().is_some());
        let ids: Vec<_> = store
            .list(None)
            .expect("list")
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, ["task_001", "task_002"]);
    }

    #[test]
    fn corrupt_file_loads_as_default() {
        let (_temp, store) = store();
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "[[[").expect("write");
        assert_eq!(store.load().expect("load"), TaskDocument::default());
    }

    #[test]
    fn add_refuses_to_replace_unparsable_file() {
        let (_temp, store) = store();
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        let broken = r#"{"tasks":[{"id":"task_001","title":"a","status":"done"},"#;
        fs::write(store.path(), broken).expect("write");

        let err = store.add("new", "").unwrap_err();
        assert!(format!("{err:#}").contains("not a valid task document"));
        assert_eq!(fs::read_to_string(store.path()).expect("read"), broken);
    }

    #[test]
    fn off_vocabulary_status_keeps_every_task() {
        let (_temp, store) = store();
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(
            store.path(),
            r#"{"tasks":[
                {"id":"task_001","title":"a","status":"done","priority":1},
                {"id":"task_002","title":"b","status":"completed","priority":2}
            ],"next_id":3}"#,
        )
        .expect("write");

        store.add("new", "").expect("add");
        let tasks = store.list(None).expect("list");
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["task_001", "task_002", "task_003"]);
        assert_eq!(tasks[1].status, TaskStatus::Done);
        assert_eq!(store.progress().expect("progress"), (2, 3));
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let (_temp, store) = store();
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store.add(&format!("w{worker}-{i}"), "").expect("add");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }

        let doc = store.load().expect("load");
        assert_eq!(doc.tasks.len(), 40);
        let mut ids: Vec<_> = doc.tasks.iter().map(|t| t.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 40);
    }

    #[test]
    fn legacy_document_is_migrated_on_disk() {
        let (_temp, store) = store();
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(
            store.path(),
            r#"{"tasks":[{"id":"task_001","title":"a","status":"pending"},{"id":"task_002","title":"b","status":"pending"}],"next_id":3}"#,
        )
        .expect("write");

        store.load().expect("load");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).expect("read")).expect("parse");
        assert_eq!(raw["tasks"][1]["priority"], 2);
    }

    #[test]
    fn raw_thoughts_can_be_cleared() {
        let (_temp, store) = store();
        store.add_raw_thought("idea").expect("think");
        assert_eq!(store.raw_thoughts().expect("thoughts").len(), 1);
        store.clear_raw_thoughts().expect("clear");
        assert!(store.raw_thoughts().expect("thoughts").is_empty());
    }
}
