use anyhow::anyhow;
use serde_json::Value;
use std::time::Duration;

use super::error::{AggregateFailure, BatchError, FailureKind, TaskFailure};
use super::store::{ResultStore, TaskResult};

/// How the wait for a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    TimedOut { completed: usize },
}

/// Turn a finished batch into its single outcome.
///
/// A timeout wins over everything else and leaves the store unread.
pub fn assemble(
    store: &ResultStore,
    completion: Completion,
    timeout: Duration,
) -> Result<Vec<Value>, BatchError> {
    let total = store.len();

    if let Completion::TimedOut { completed } = completion {
        return Err(BatchError::Timeout {
            timeout,
            completed,
            total,
        });
    }

    let mut values = Vec::with_capacity(total);
    let mut failures = Vec::new();

    for (index, slot) in store.drain().into_iter().enumerate() {
        match slot {
            Some(TaskResult::Success(value)) => values.push(value),
            Some(TaskResult::Failure(failure)) => failures.push(failure),
            None => failures.push(TaskFailure::new(
                index,
                FailureKind::Harness,
                anyhow!("task {} finished without reporting a result", index),
                String::new(),
            )),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(AggregateFailure::new(failures, total).into())
    }
}
