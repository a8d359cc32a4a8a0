//! Callables backed by external programs

pub mod command;

pub use command::{SHELL_EXEC, ShellCommand};

use crate::registry::{Registry, ResolveError};
use std::sync::Arc;

/// Registry holding the built-in callables for one command line
pub fn builtin_registry(command: ShellCommand) -> Result<Registry, ResolveError> {
    Registry::new().with(Arc::new(command))
}
