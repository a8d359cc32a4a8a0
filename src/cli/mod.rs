//! Command-line interface for fanout
//!
//! Argument parsing lives in [`commands`]; [`Output`] provides the styled terminal output
//! shared by every command.

pub mod commands;
pub mod output;

pub use commands::Cli;
pub use output::Output;
