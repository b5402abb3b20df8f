//! Operator message queue (`.a1/queue.json`).
//!
//! The dashboard and CLI append messages; the session loop drains unread ones
//! into the next prompt. Both sides update the file under the document lock,
//! so a message appended mid-drain is delivered by the next drain.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::json::{read_json_lenient, write_json_atomic};
use super::lock::with_document_lock;
use super::timestamp;
use crate::core::types::QueuedMessage;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct QueueDocument {
    messages: Vec<QueuedMessage>,
}

#[derive(Debug, Clone)]
pub struct MessageQueue {
    path: PathBuf,
}

impl MessageQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<QueueDocument> {
        Ok(read_json_lenient(&self.path)?.unwrap_or_default())
    }

    pub fn enqueue(&self, text: &str) -> Result<QueuedMessage> {
        let message = QueuedMessage {
            text: text.to_string(),
            added_at: timestamp(),
            read: false,
        };
        with_document_lock(&self.path, || {
            let mut doc = self.load()?;
            doc.messages.push(message.clone());
            write_json_atomic(&self.path, &doc)
        })?;
        Ok(message)
    }

    pub fn list(&self) -> Result<Vec<QueuedMessage>> {
        Ok(self.load()?.messages)
    }

    /// Return unread messages and mark them read.
    pub fn drain_unread(&self) -> Result<Vec<QueuedMessage>> {
        with_document_lock(&self.path, || {
            let mut doc = self.load()?;
            let unread: Vec<QueuedMessage> =
                doc.messages.iter().filter(|m| !m.read).cloned().collect();
            if unread.is_empty() {
                return Ok(unread);
            }
            for message in &mut doc.messages {
                message.read = true;
            }
            write_json_atomic(&self.path, &doc)?;
            debug!(count = unread.len(), "drained operator messages");
            Ok(unread)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_each_message_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let queue = MessageQueue::new(temp.path().join("queue.json"));
        assert!(queue.drain_unread().expect("drain").is_empty());

        queue.enqueue("use tabs").expect("enqueue");
        queue.enqueue("add docs").expect("enqueue");
        let drained = queue.drain_unread().expect("drain");
        assert_eq!(
            drained.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            ["use tabs", "add docs"]
        );
        assert!(queue.drain_unread().expect("drain").is_empty());

        let all = queue.list().expect("list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|m| m.read));
    }

    #[test]
    fn messages_enqueued_during_drains_are_all_delivered() {
        let temp = tempfile::tempdir().expect("tempdir");
        let queue = MessageQueue::new(temp.path().join("queue.json"));
        let writer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    queue.enqueue(&format!("m{i}")).expect("enqueue");
                }
            })
        };

        let mut delivered = Vec::new();
        while !writer.is_finished() {
            delivered.extend(queue.drain_unread().expect("drain"));
        }
        writer.join().expect("writer");
        delivered.extend(queue.drain_unread().expect("drain"));

        let texts: Vec<String> = delivered.into_iter().map(|m| m.text).collect();
        let expected: Vec<String> = (0..200).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }
}
