use fs2::FileExt;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to lock working copy {path}: {source}")]
pub struct LockError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

/// Serializes work on a working-copy path.
///
/// Threads of one process queue on an in-memory mutex per path (clones share
/// the table). Separate processes queue on an exclusive lock of
/// `{working_copy}.lock`, a sibling of the working copy.
#[derive(Debug, Clone, Default)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> Result<T, LockError> {
        let lock = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(path.to_path_buf()).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let lock_path = lock_path_for(path);
        let file = open_lock_file(&lock_path).and_then(|file| {
            file.lock_exclusive()?;
            Ok(file)
        });
        let file = file.map_err(|source| LockError {
            path: lock_path.display().to_string(),
            source,
        })?;
        let value = f();
        // closing the handle releases the lock
        drop(file);
        Ok(value)
    }
}

/// `/work/acme/api` locks on `/work/acme/api.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => {
            let mut name = OsString::from(name);
            name.push(".lock");
            path.with_file_name(name)
        }
        None => path.join(".na.lock"),
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn assert_serialized(tables: &[RepoLocks], path: &Path) {
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let locks = tables[n % tables.len()].clone();
                let path = path.to_path_buf();
                let busy = Arc::clone(&busy);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    locks
                        .with_lock(&path, || {
                            if busy.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_millis(20));
                            busy.store(false, Ordering::SeqCst);
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn same_path_is_serialized() {
        let dir = TempDir::new().unwrap();
        assert_serialized(&[RepoLocks::new()], &dir.path().join("acme/api"));
    }

    #[test]
    fn separate_tables_share_the_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme/api");
        assert_serialized(&[RepoLocks::new(), RepoLocks::new()], &path);
        assert!(dir.path().join("acme/api.lock").exists());
        assert!(!path.exists());
    }

    #[test]
    fn different_paths_do_not_block() {
        let dir = TempDir::new().unwrap();
        let locks = RepoLocks::new();
        let value = locks
            .with_lock(&dir.path().join("a"), || {
                locks.with_lock(&dir.path().join("b"), || 7).unwrap()
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn lock_file_sits_next_to_working_copy() {
        assert_eq!(
            lock_path_for(Path::new("/work/acme/api")),
            PathBuf::from("/work/acme/api.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/work/acme/api.v2")),
            PathBuf::from("/work/acme/api.v2.lock")
        );
    }
}
