use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::registry::ResolveError;

/// Where a task failure was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The callable returned an error
    Error,
    /// The callable panicked
    Panic,
    /// The worker failed around the task (observer hook, bookkeeping) or never reported it
    Harness,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Error => "error",
            FailureKind::Panic => "panic",
            FailureKind::Harness => "harness",
        };
        f.write_str(label)
    }
}

/// One failed task: the original error, its trace and the index it was submitted at
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub kind: FailureKind,
    pub error: anyhow::Error,
    pub trace: String,
}

impl TaskFailure {
    pub fn new(index: usize, kind: FailureKind, error: anyhow::Error, trace: String) -> Self {
        Self {
            index,
            kind,
            error,
            trace,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} failed ({}): {:#}", self.index, self.kind, self.error)
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = self.error.as_ref();
        Some(source)
    }
}

/// Every failure of a batch, in ascending index order.
///
/// A single failure and many failures share this shape; only the length differs.
#[derive(Debug)]
pub struct AggregateFailure {
    failures: Vec<TaskFailure>,
    total: usize,
}

impl AggregateFailure {
    pub(crate) fn new(mut failures: Vec<TaskFailure>, total: usize) -> Self {
        failures.sort_by_key(|failure| failure.index);
        Self { failures, total }
    }

    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<TaskFailure> {
        self.failures
    }

    /// Number of tasks in the batch the failures came from
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn indices(&self) -> Vec<usize> {
        self.failures.iter().map(|failure| failure.index).collect()
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.len() == 1 {
            write!(f, "a task failed while multithreading: {}", self.failures[0])
        } else {
            write!(
                f,
                "{} of {} tasks failed while multithreading (indices {:?})",
                self.failures.len(),
                self.total,
                self.indices()
            )
        }
    }
}

impl std::error::Error for AggregateFailure {}

/// Invalid batch configuration, reported before any worker is spawned
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("positional and keyword argument sources are mutually exclusive")]
    ConflictingArguments,

    #[error("parameter set {index} is {found}; every entry must be an array (positional) or an object (keyword) of the same kind")]
    InvalidParameterSet { index: usize, found: String },

    #[error("parameter source must be a JSON array, found {0}")]
    InvalidParameterSource(String),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("callable `{0}` was given by name but no symbol resolver is configured")]
    NoResolver(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Outcome of a batch that did not produce an ordered list of values
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid batch: {0}")]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Failed(#[from] AggregateFailure),

    #[error("batch did not finish within {timeout:?} ({completed}/{total} tasks completed)")]
    Timeout {
        timeout: Duration,
        completed: usize,
        total: usize,
    },

    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl BatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BatchError::Timeout { .. })
    }

    /// Failures enumerated by an aggregate failure, empty for every other outcome
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            BatchError::Failed(aggregate) => aggregate.failures(),
            _ => &[],
        }
    }
}

/// Render an error with its cause chain and, when one was captured, its backtrace
pub(crate) fn render_trace(error: &anyhow::Error) -> String {
    format!("{error:?}")
}
