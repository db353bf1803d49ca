//! Task store boundary.
//!
//! The verification engine reports lifecycle changes through [`TaskStore`].
//! [`MemoryTaskStore`] is the in-process implementation used by the CLI
//! and tests.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{Task, TaskStatus};
use crate::error::{CoreError, Result};

/// Partial update applied by [`TaskStore::update_task`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub is_completed: Option<bool>,
    pub actual_start: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub gold_earned: Option<i64>,
    pub verification_note: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(done) = self.is_completed {
            task.is_completed = done;
        }
        if let Some(start) = self.actual_start {
            task.actual_start = Some(start);
        }
        if let Some(end) = self.end_time {
            task.end_time = Some(end);
        }
        if let Some(gold) = self.gold_earned {
            task.gold_earned = gold;
        }
        if let Some(note) = self.verification_note {
            task.verification_note = Some(note);
        }
    }
}

/// Owner of task records.
pub trait TaskStore {
    fn get(&self, id: &str) -> Option<Task>;

    /// Apply a partial update and return the updated task.
    fn update_task(&mut self, id: &str, update: TaskUpdate) -> Result<Task>;
}

/// In-memory task store keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    tasks: BTreeMap<String, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        self.tasks.remove(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl FromIterator<Task> for MemoryTaskStore {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut store = Self::new();
        for task in iter {
            store.insert(task);
        }
        store
    }
}

impl TaskStore for MemoryTaskStore {
    fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).cloned()
    }

    fn update_task(&mut self, id: &str, update: TaskUpdate) -> Result<Task> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::TaskNotFound(id.to_string()))?;
        update.apply(task);
        Ok(task.clone())
    }
}
