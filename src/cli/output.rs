//! Styled terminal output for fanout
//!
//! Consistent symbols and colours for command results, plus the batch progress bar.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output handler for consistent CLI formatting
pub struct Output {
    verbose: bool,
    quiet: bool,
}

impl Output {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        // Errors are always shown, even in quiet mode
        eprintln!("{} {}", style("✖").red(), message);
    }

    /// Print a verbose message (only if verbose mode is enabled), to stderr
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            eprintln!("{} {}", style("ℹ").dim(), style(message).dim());
        }
    }

    /// Print a header/title
    pub fn header(&self, title: &str) {
        if !self.quiet {
            println!("\n{}", style(title).bold().underlined());
        }
    }

    /// Print a category heading
    pub fn category(&self, title: &str) {
        if !self.quiet {
            println!("{}", style(title).bold().cyan());
        }
    }

    /// Print an aligned key/value pair
    pub fn key_value(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {:<16} {}", style(key).dim(), value);
        }
    }

    /// Print a labelled status line
    pub fn status_indicator(&self, label: &str, message: &str, ok: bool) {
        if self.quiet {
            return;
        }
        let label = if ok {
            style(format!("[{label}]")).green().bold()
        } else {
            style(format!("[{label}]")).red().bold()
        };
        println!("{} {}", label, message);
    }

    /// Print a failed task heading followed by its indented trace, always to stderr
    pub fn failure(&self, heading: &str, trace: &str) {
        eprintln!("{} {}", style("✖").red().bold(), style(heading).red().bold());
        for line in trace.lines() {
            eprintln!("    {}", style(line).dim());
        }
    }

    /// Print blank line
    pub fn blank_line(&self) {
        if !self.quiet {
            println!();
        }
    }

    /// Progress bar for a batch; hidden in quiet mode
    pub fn progress_bar(&self, len: u64, message: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb
    }
}
