//! Advisory locks serializing read-modify-write of shared `.a1/` documents.
//!
//! The loop thread, the dashboard and separate `a1` processes all update the
//! same files. Each update holds an exclusive lock on a `<file>.lock` sidecar
//! for the whole load, change and save.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::warn;

/// Held lock; released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
    path: PathBuf,
}

impl DocumentLock {
    /// Block until the lock guarding `document` is acquired.
    pub fn acquire(document: &Path) -> Result<Self> {
        let path = lock_path(document);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock {}", path.display()))?;
        Ok(Self { file, path })
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), err = %e, "failed to release lock");
        }
    }
}

fn lock_path(document: &Path) -> PathBuf {
    let mut name = document
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    document.with_file_name(name)
}

/// Run `f` while holding the lock for `document`.
pub fn with_document_lock<T>(document: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let _lock = DocumentLock::acquire(document)?;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn lock_file_sits_next_to_document() {
        assert_eq!(
            lock_path(Path::new("/p/.a1/queue.json")),
            PathBuf::from("/p/.a1/queue.json.lock")
        );
    }

    #[test]
    fn holders_are_mutually_exclusive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let doc = Arc::new(temp.path().join("doc.json"));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let doc = Arc::clone(&doc);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..25 {
                        with_document_lock(&doc, || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .expect("locked section");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
    }
}
