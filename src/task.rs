//! Local task store.
//!
//! Tasks live in one JSON snapshot (`tasks.json`). [`JsonTaskStore`]
//! stages every change in memory, so `load_tasks` sees earlier writes of
//! the same pass, and `commit` rewrites the snapshot atomically under the
//! store lock. Pending tasks are numbered `1..n` in store order on every
//! commit; completed and deleted tasks carry id `0`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::issue::{format_timestamp, parse_timestamp};
use crate::lock::{StoreLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage;

const TASKS_SCHEMA_VERSION: &str = "issuesync.tasks.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Deleted,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            "deleted" => Ok(TaskStatus::Deleted),
            other => Err(Error::InvalidArgument(format!(
                "unknown task status '{other}' (expected pending|completed|deleted)"
            ))),
        }
    }
}

/// A persisted task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTask {
    pub uuid: Uuid,
    #[serde(default)]
    pub id: u64,
    pub status: TaskStatus,
    pub description: String,
    pub entry: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Configured target whose records last wrote this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    /// UDA fields written by earlier passes
    #[serde(flatten)]
    pub udas: BTreeMap<String, Value>,
}

impl LocalTask {
    /// A fresh pending task with a new uuid
    pub fn new(description: impl Into<String>, entry: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: 0,
            status: TaskStatus::Pending,
            description: description.into(),
            entry,
            modified: None,
            end: None,
            target: None,
            project: None,
            priority: None,
            due: None,
            tags: Vec::new(),
            annotations: Vec::new(),
            udas: BTreeMap::new(),
        }
    }

    /// Current value of a mergeable field; `None` when unset or empty
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "description" => {
                (!self.description.is_empty()).then(|| Value::String(self.description.clone()))
            }
            "project" => self.project.clone().map(Value::String),
            "priority" => self.priority.clone().map(Value::String),
            "due" => self.due.map(|due| Value::String(format_timestamp(due))),
            "tags" => list_value(&self.tags),
            "annotations" => list_value(&self.annotations),
            other => self.udas.get(other).filter(|value| !value.is_null()).cloned(),
        }
    }

    /// Set or clear a mergeable field
    pub fn set_field(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        match name {
            "description" => {
                self.description = match value {
                    Some(value) => scalar_string(name, value)?.unwrap_or_default(),
                    None => String::new(),
                };
            }
            "project" => self.project = value.map(|v| scalar_string(name, v)).transpose()?.flatten(),
            "priority" => {
                self.priority = value.map(|v| scalar_string(name, v)).transpose()?.flatten()
            }
            "due" => {
                self.due = match value.map(|v| scalar_string(name, v)).transpose()?.flatten() {
                    Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| Error::FieldType {
                        field: name.to_string(),
                        expected: "a timestamp".to_string(),
                    })?),
                    None => None,
                };
            }
            "tags" => self.tags = string_list(name, value)?,
            "annotations" => self.annotations = string_list(name, value)?,
            "uuid" | "id" | "status" | "entry" | "end" | "modified" | "target" => {
                return Err(Error::FieldType {
                    field: name.to_string(),
                    expected: "a field not managed by the task store".to_string(),
                });
            }
            other => match value {
                Some(Value::Null) | None => {
                    self.udas.remove(other);
                }
                Some(value) => {
                    self.udas.insert(other.to_string(), value);
                }
            },
        }
        Ok(())
    }

    /// Compare user-visible content, ignoring `modified` and `id`
    pub fn same_content(&self, other: &LocalTask) -> bool {
        self.uuid == other.uuid
            && self.status == other.status
            && self.description == other.description
            && self.entry == other.entry
            && self.end == other.end
            && self.target == other.target
            && self.project == other.project
            && self.priority == other.priority
            && self.due == other.due
            && self.tags == other.tags
            && self.annotations == other.annotations
            && self.udas == other.udas
    }
}

fn list_value(values: &[String]) -> Option<Value> {
    if values.is_empty() {
        None
    } else {
        Some(Value::Array(values.iter().cloned().map(Value::String).collect()))
    }
}

fn scalar_string(field: &str, value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(value) => Ok(Some(value)),
        Value::Number(value) => Ok(Some(value.to_string())),
        Value::Bool(value) => Ok(Some(value.to_string())),
        _ => Err(Error::FieldType {
            field: field.to_string(),
            expected: "a scalar".to_string(),
        }),
    }
}

fn string_list(field: &str, value: Option<Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .into_iter()
            .map(|value| match scalar_string(field, value)? {
                Some(value) => Ok(value),
                None => Err(Error::FieldType {
                    field: field.to_string(),
                    expected: "a list of strings".to_string(),
                }),
            })
            .collect(),
        Some(_) => Err(Error::FieldType {
            field: field.to_string(),
            expected: "a list of strings".to_string(),
        }),
    }
}

/// Non-deleted tasks, split by status, in store order
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    pub pending: Vec<LocalTask>,
    pub completed: Vec<LocalTask>,
}

impl TaskSet {
    pub fn len(&self) -> usize {
        self.pending.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.completed.is_empty()
    }
}

/// Persistence seam used by the synchronizer
pub trait TaskStore {
    fn load_tasks(&self) -> Result<TaskSet>;

    fn add_task(&mut self, task: LocalTask) -> Result<()>;

    fn update_task(&mut self, task: LocalTask) -> Result<()>;

    fn complete_task(&mut self, uuid: Uuid, end: DateTime<Utc>) -> Result<()>;

    /// Store `task` as pending again, keeping its uuid
    fn reopen_task(&mut self, task: LocalTask) -> Result<()>;

    /// Persist staged changes; returns how many were written
    fn commit(&mut self) -> Result<usize>;

    /// Drop staged changes
    fn discard(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub tasks: Vec<LocalTask>,
}

impl TaskSnapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: TASKS_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            tasks: Vec::new(),
        }
    }
}

/// Task store backed by a JSON snapshot file
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    staged: Option<Vec<LocalTask>>,
    changes: usize,
}

impl JsonTaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            staged: None,
            changes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of staged, uncommitted changes
    pub fn staged_changes(&self) -> usize {
        self.changes
    }

    /// All tasks including deleted ones, optionally filtered by status
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<LocalTask>> {
        let tasks = match &self.staged {
            Some(tasks) => tasks.clone(),
            None => self.read_snapshot()?.tasks,
        };
        Ok(tasks
            .into_iter()
            .filter(|task| status.map_or(true, |status| task.status == status))
            .collect())
    }

    fn read_snapshot(&self) -> Result<TaskSnapshot> {
        if !self.path.exists() {
            return Ok(TaskSnapshot::empty());
        }
        let snapshot: TaskSnapshot = storage::read_json(&self.path)?;
        if snapshot.schema_version != TASKS_SCHEMA_VERSION {
            return Err(Error::OperationFailed(format!(
                "{}: unsupported schema version '{}'",
                self.path.display(),
                snapshot.schema_version
            )));
        }
        Ok(snapshot)
    }

    fn staged_mut(&mut self) -> Result<&mut Vec<LocalTask>> {
        if self.staged.is_none() {
            self.staged = Some(self.read_snapshot()?.tasks);
        }
        Ok(self.staged.get_or_insert_with(Vec::new))
    }

    fn find_mut(&mut self, uuid: Uuid) -> Result<&mut LocalTask> {
        self.staged_mut()?
            .iter_mut()
            .find(|task| task.uuid == uuid)
            .ok_or_else(|| Error::TaskNotFound(uuid.to_string()))
    }
}

impl TaskStore for JsonTaskStore {
    fn load_tasks(&self) -> Result<TaskSet> {
        let mut set = TaskSet::default();
        for task in self.list(None)? {
            match task.status {
                TaskStatus::Pending => set.pending.push(task),
                TaskStatus::Completed => set.completed.push(task),
                TaskStatus::Deleted => {}
            }
        }
        Ok(set)
    }

    fn add_task(&mut self, task: LocalTask) -> Result<()> {
        let tasks = self.staged_mut()?;
        if tasks.iter().any(|existing| existing.uuid == task.uuid) {
            return Err(Error::OperationFailed(format!(
                "task {} already exists",
                task.uuid
            )));
        }
        tasks.push(task);
        self.changes += 1;
        Ok(())
    }

    fn update_task(&mut self, task: LocalTask) -> Result<()> {
        let existing = self.find_mut(task.uuid)?;
        let id = existing.id;
        *existing = task;
        existing.id = id;
        self.changes += 1;
        Ok(())
    }

    fn complete_task(&mut self, uuid: Uuid, end: DateTime<Utc>) -> Result<()> {
        let existing = self.find_mut(uuid)?;
        existing.status = TaskStatus::Completed;
        existing.end = Some(end);
        existing.modified = Some(end);
        self.changes += 1;
        Ok(())
    }

    fn reopen_task(&mut self, task: LocalTask) -> Result<()> {
        let existing = self.find_mut(task.uuid)?;
        *existing = task;
        existing.status = TaskStatus::Pending;
        existing.end = None;
        self.changes += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<usize> {
        let changes = self.changes;
        let Some(mut tasks) = self.staged.take() else {
            return Ok(0);
        };
        if changes == 0 {
            return Ok(0);
        }

        renumber(&mut tasks);
        let snapshot = TaskSnapshot {
            schema_version: TASKS_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            tasks,
        };

        let _lock = StoreLock::acquire(&self.path, DEFAULT_LOCK_TIMEOUT_MS)?;
        storage::write_json(&self.path, &snapshot)?;
        self.changes = 0;
        tracing::debug!(path = %self.path.display(), changes, "committed task store");
        Ok(changes)
    }

    fn discard(&mut self) {
        self.staged = None;
        self.changes = 0;
    }
}

/// Pending tasks get `1..n` in store order; everything else gets `0`.
pub fn renumber(tasks: &mut [LocalTask]) {
    let mut next = 1;
    for task in tasks.iter_mut() {
        if task.status == TaskStatus::Pending {
            task.id = next;
            next += 1;
        } else {
            task.id = 0;
        }
    }
}
