//! Bounded, ordered, deadline-aware batch execution
//!
//! This module fans a single callable out across many argument sets, runs them on a worker
//! pool created for that batch, and reports back exactly one outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  ArgSource   │   │   WorkerPool     │   │ ResultStore  │   │   report     │
//! │              │──▶│                  │──▶│              │──▶│              │
//! │ • positional │   │ • N named threads│   │ • slot/index │   │ • ordered    │
//! │ • keyword    │   │ • shared queue   │   │ • first write│   │   values     │
//! │ • single     │   │ • panic capture  │   │   wins       │   │ • aggregate  │
//! └──────────────┘   └──────────────────┘   └──────────────┘   │ • timeout    │
//!        ▲                    ▲                                └──────────────┘
//!        └──── BatchExecutor: build tasks, arm deadline, wait, cancel ────┘
//! ```
//!
//! ## Outcomes
//! - every task succeeded: `Ok(values)`, `values[i]` produced from argument set `i`
//! - one or more tasks failed: [`BatchError::Failed`] with every failure, lowest index first
//! - the deadline passed first: [`BatchError::Timeout`], whatever the finished tasks did
//! - the configuration was invalid: [`BatchError::Usage`], before any thread starts
//!
//! A failed task is reported, never retried, and never stops the rest of the batch.
//!
//! # Example Usage
//!
//! ```rust
//! use fanout::parallel::{ArgSource, BatchExecutor, callable};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let double = callable("math.double", |_, args| Ok(json!(args.i64(0, "x")? * 2)));
//! let source = ArgSource::from_json(json!([{"x": 1}, {"x": 2}, {"x": 3}])).unwrap();
//!
//! let values = BatchExecutor::new()
//!     .with_max_workers(2)
//!     .with_timeout(Duration::from_secs(5))
//!     .execute(double, source)
//!     .unwrap();
//!
//! assert_eq!(values, vec![json!(2), json!(4), json!(6)]);
//! ```

pub mod core;
pub mod error;
mod panic;
pub mod pool;
pub mod report;
pub mod store;
pub mod task;

// Re-export main types for easier access
pub use self::core::{
    Batch, BatchExecutor, BatchState, DEFAULT_CANCEL_GRACE, DEFAULT_TIMEOUT, execute,
};
pub use error::{AggregateFailure, BatchError, FailureKind, TaskFailure, UsageError};
pub use pool::{NoopObserver, WorkerObserver, WorkerPool};
pub use store::{ResultStore, TaskResult};
pub use task::{
    ArgSource, ArgumentError, Arguments, Callable, FnCallable, TaskContext, TaskDescriptor,
    build_tasks, callable,
};
