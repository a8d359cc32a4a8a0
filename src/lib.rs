//! # fanout - bounded, ordered parallel execution
//!
//! Run one callable over many parameter sets on a worker pool created for the batch.
//! Results come back in submission order, every failure is reported together, and the
//! whole batch is held to a single deadline.
//!
//! ## Features
//!
//! - **Ordered results**: `values[i]` always comes from parameter set `i`
//! - **Aggregate failures**: one error enumerating every failed task with its trace
//! - **Deadline**: a batch that overruns reports a timeout instead of partial results
//! - **Bounded pool**: at most `max_workers` tasks run at once
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a command once per parameter set, four at a time
//! fanout exec --params params.json --max-workers 4 -- ./process.sh
//! ```

pub mod cli;
pub mod config;
pub mod external;
pub mod parallel;
pub mod registry;

pub use cli::{Cli, Output};
pub use config::{ExecutorSettings, FanoutConfig};
pub use parallel::{ArgSource, BatchError, BatchExecutor};

/// Result type alias for fanout application code
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
