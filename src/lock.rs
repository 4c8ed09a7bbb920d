//! Advisory locking for the task store.
//!
//! A commit holds an exclusive `fs2` lock on `<store>.lock` while it
//! rewrites the task file, so two runs against the same store never
//! interleave their writes. The holder writes its pid and start time into
//! the lock file; a run that times out reports who it waited on.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;

use crate::error::{Error, Result};

/// How long a commit waits for another run to release the store
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `tasks.json` is guarded by `tasks.json.lock`
pub fn lock_path_for(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Exclusive hold on a task store, released on drop
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Lock the store at `store`, waiting up to `timeout_ms`
    pub fn acquire(store: &Path, timeout_ms: u64) -> Result<Self> {
        let path = lock_path_for(store);
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if contended(&err) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            lock = %path.display(),
                            holder = %read_holder(&mut file),
                            "task store is locked by another run"
                        );
                        return Err(Error::LockFailed(path));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }

        write_holder(&mut file)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

fn contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // fs2 reports Windows sharing violations as raw os errors.
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

fn write_holder(file: &mut File) -> Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "pid={} since={}", std::process::id(), Utc::now().to_rfc3339())?;
    file.flush()?;
    Ok(())
}

fn read_holder(file: &mut File) -> String {
    let mut holder = String::new();
    if file.seek(SeekFrom::Start(0)).is_ok() && file.read_to_string(&mut holder).is_ok() {
        let holder = holder.trim();
        if !holder.is_empty() {
            return holder.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn lock_path_appends_suffix() {
        let path = lock_path_for(Path::new("/tmp/tasks.json"));
        assert_eq!(path, PathBuf::from("/tmp/tasks.json.lock"));
    }

    #[test]
    fn holder_is_recorded_while_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("tasks.json");

        let lock = StoreLock::acquire(&store, 1000).expect("acquire");
        assert_eq!(lock.path(), dir.path().join("tasks.json.lock"));
        let content = std::fs::read_to_string(lock.path()).expect("read lock");
        assert!(content.starts_with(&format!("pid={}", std::process::id())));

        drop(lock);
        StoreLock::acquire(&store, 1000).expect("reacquire after release");
    }

    #[test]
    fn second_run_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("tasks.json");

        let _lock = StoreLock::acquire(&store, 1000).expect("acquire");
        let waiter = store.clone();
        let result = thread::spawn(move || StoreLock::acquire(&waiter, 50))
            .join()
            .expect("join");
        assert!(matches!(result, Err(Error::LockFailed(_))));
    }
}
