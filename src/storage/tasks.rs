/// tasks.json: task-start timestamp -> {task_type, status}
///
/// The status text of a task is overwritten on every step, so the file always
/// shows where each task currently is. It is the only channel between a
/// background fetch and whoever is watching it.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::warn;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::models::TaskEntry;
use crate::storage::files::{ensure_json_file, read_json, write_json};
use crate::utils::epoch_seconds;

pub const TASK_FETCH: &str = "Fetch data";
pub const TASK_SCAN: &str = "Scanning sensors";
pub const TASK_WORKFLOW: &str = "BLE Device Scan and Connect";

pub type Tasks = BTreeMap<String, TaskEntry>;

#[derive(Debug, Clone)]
pub struct TaskLog {
    path: PathBuf,
}

impl TaskLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_exists(&self) -> Result<(), StorageError> {
        ensure_json_file(&self.path)
    }

    pub fn load(&self) -> Result<Tasks, StorageError> {
        read_json(&self.path)
    }

    /// Register a new task keyed by its start time and return the key
    ///
    /// Two tasks started within the same second get a numeric suffix.
    pub fn start(&self, task_type: &str, status: &str) -> Result<String, StorageError> {
        let mut tasks = self.load()?;
        let base = epoch_seconds(&OffsetDateTime::now_utc()).to_string();
        let mut id = base.clone();
        let mut n = 1;
        while tasks.contains_key(&id) {
            id = format!("{}-{}", base, n);
            n += 1;
        }

        tasks.insert(
            id.clone(),
            TaskEntry {
                task_type: task_type.to_string(),
                status: status.to_string(),
            },
        );
        write_json(&self.path, &tasks)?;
        Ok(id)
    }

    pub fn update(&self, id: &str, status: &str) -> Result<(), StorageError> {
        let mut tasks = self.load()?;
        match tasks.get_mut(id) {
            Some(entry) => entry.status = status.to_string(),
            None => {
                warn!("Task {} missing from {}, recreating it", id, self.path.display());
                tasks.insert(
                    id.to_string(),
                    TaskEntry {
                        task_type: String::new(),
                        status: status.to_string(),
                    },
                );
            }
        }
        write_json(&self.path, &tasks)
    }

    /// Update a task's status, logging instead of failing
    pub fn report(&self, id: &str, status: &str) {
        if let Err(e) = self.update(id, status) {
            warn!("Failed to update task {}: {}", id, e);
        }
    }

    pub fn status(&self, id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(id).map(|entry| entry.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn task_log() -> (TempDir, TaskLog) {
        let dir = tempdir().unwrap();
        let log = TaskLog::new(dir.path().join("tasks.json"));
        log.ensure_exists().unwrap();
        (dir, log)
    }

    #[test]
    fn start_then_overwrite_status() {
        let (_dir, log) = task_log();
        let id = log.start(TASK_FETCH, "Trying to connect A").unwrap();

        log.update(&id, "Connected to: A").unwrap();

        let tasks = log.load().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[&id].task_type, TASK_FETCH);
        assert_eq!(tasks[&id].status, "Connected to: A");
    }

    #[test]
    fn same_second_tasks_get_distinct_keys() {
        let (_dir, log) = task_log();
        let first = log.start(TASK_WORKFLOW, "Initializing").unwrap();
        let second = log.start(TASK_SCAN, "running...").unwrap();
        let third = log.start(TASK_FETCH, "Trying").unwrap();

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(log.load().unwrap().len(), 3);
    }

    #[test]
    fn status_of_unknown_task_is_none() {
        let (_dir, log) = task_log();
        assert_eq!(log.status("123").unwrap(), None);
    }

    #[test]
    fn update_of_missing_task_recreates_it() {
        let (_dir, log) = task_log();
        log.update("42", "Finished").unwrap();
        assert_eq!(log.status("42").unwrap().as_deref(), Some("Finished"));
    }
}
