use serde_json::Value;
use std::sync::{Mutex, PoisonError};

use super::error::TaskFailure;

/// Outcome of a single task
#[derive(Debug)]
pub enum TaskResult {
    Success(Value),
    Failure(TaskFailure),
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }
}

/// Results of one batch, one slot per task index.
///
/// Each slot has its own lock, so workers writing different indices never contend.
/// A slot reads as empty until its task has been recorded, and the first write wins.
#[derive(Debug)]
pub struct ResultStore {
    slots: Vec<Mutex<Option<TaskResult>>>,
}

impl ResultStore {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store the result for `index`. Returns false if the slot was already filled or doesn't exist.
    pub fn record(&self, index: usize, result: TaskResult) -> bool {
        let Some(slot) = self.slots.get(index) else {
            tracing::error!("Result for unknown task index {} dropped", index);
            return false;
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            tracing::debug!("Task {} already has a result, keeping the first one", index);
            return false;
        }
        *guard = Some(result);
        true
    }

    pub fn is_recorded(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .unwrap_or(false)
    }

    /// Remove and return the result for `index`, if its task has finished
    pub fn take(&self, index: usize) -> Option<TaskResult> {
        self.slots
            .get(index)
            .and_then(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).take())
    }

    /// Take every slot in index order
    pub fn drain(&self) -> Vec<Option<TaskResult>> {
        (0..self.slots.len()).map(|index| self.take(index)).collect()
    }
}
