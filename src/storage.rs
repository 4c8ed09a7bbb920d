//! Storage layer for issuesync
//!
//! All persistent state lives under one data directory:
//!
//! ```text
//! <data_dir>/
//!   tasks.json        # Task store snapshot (see `task::JsonTaskStore`)
//!   tasks.json.lock   # Commit lock
//!   data.json         # Small key/value file (last sync report, tokens)
//! ```
//!
//! The directory defaults to the platform data dir (`directories`) and can
//! be overridden with `general.data_dir` / `general.taskdata`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// File name of the task store snapshot
pub const TASKS_FILE: &str = "tasks.json";

/// File name of the key/value data file
pub const DATA_FILE: &str = "data.json";

/// Root directory of issuesync state
#[derive(Debug, Clone)]
pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Storage rooted at the platform data directory
    pub fn default_location() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "issuesync").ok_or_else(|| {
            Error::InvalidConfig("cannot determine a home directory for data_dir".to_string())
        })?;
        Ok(Self::new(dirs.data_dir().to_path_buf()))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.data_dir.join(TASKS_FILE)
    }

    pub fn data_file(&self) -> PathBuf {
        self.data_dir.join(DATA_FILE)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn data(&self) -> DataFile {
        DataFile::new(self.data_file())
    }
}

/// Pretty JSON written through [`write_atomic`]
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    write_atomic(path, json.as_bytes(), None)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Replace `path` with `data` via a sibling temp file and a rename.
///
/// Readers see the old or the new content, never a partial write. `mode`
/// is applied to the temp file before any byte lands in it (Unix only).
pub fn write_atomic(path: &Path, data: &[u8], mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Some(mode) = mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// JSON object on disk holding values that must survive between runs.
///
/// May hold credentials, so it is only ever written with mode 0600.
#[derive(Debug, Clone)]
pub struct DataFile {
    path: PathBuf,
}

impl DataFile {
    const MODE: u32 = 0o600;

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entire content; empty when the file does not exist yet
    pub fn get_data(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_data()?.remove(key))
    }

    /// Set one key, keeping everything else in the file
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut data = self.get_data()?;
        data.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&data)?;
        write_atomic(&self.path, json.as_bytes(), Some(Self::MODE))?;
        restrict_permissions(&self.path)
    }
}

// A pre-existing temp file keeps its old mode, so check the result too.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(DataFile::MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_paths() {
        let storage = Storage::new(PathBuf::from("/data"));
        assert_eq!(storage.tasks_file(), PathBuf::from("/data/tasks.json"));
        assert_eq!(storage.data_file(), PathBuf::from("/data/data.json"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("tasks.json");

        write_atomic(&path, b"first", None).expect("write");
        write_atomic(&path, b"second", None).expect("overwrite");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn data_file_keeps_existing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::new(dir.path().to_path_buf());
        fs::write(storage.data_file(), "{\"token\": \"abc\"}").expect("seed");

        let data = storage.data();
        data.set("last_sync", Value::from("today")).expect("set");

        assert_eq!(
            data.get("last_sync").expect("get"),
            Some(Value::from("today"))
        );
        let all = data.get_data().expect("data");
        assert_eq!(all.get("token"), Some(&Value::from("abc")));
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn missing_data_file_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = DataFile::new(dir.path().join("data.json"));
        assert!(data.get_data().expect("data").is_empty());
        assert_eq!(data.get("anything").expect("get"), None);
    }

    #[cfg(unix)]
    #[test]
    fn data_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let data = DataFile::new(dir.path().join("data.json"));
        data.set("key", Value::from("value")).expect("set");

        let mode = fs::metadata(data.path()).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
