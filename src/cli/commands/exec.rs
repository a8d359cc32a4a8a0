use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Output;
use crate::config::FanoutConfig;
use crate::external::{SHELL_EXEC, ShellCommand, builtin_registry};
use crate::parallel::{ArgSource, BatchError, BatchExecutor};

/// Exit code when at least one task failed
const EXIT_FAILED: i32 = 1;
/// Exit code when the batch missed its deadline
const EXIT_TIMEOUT: i32 = 124;
/// Time cancelled tasks get to kill their commands before the process exits
const CANCEL_GRACE: Duration = Duration::from_secs(1);

#[derive(Args)]
pub struct ExecArgs {
    /// JSON file holding an array of parameter sets: all arrays (appended as arguments)
    /// or all objects (exported as environment variables)
    #[arg(short, long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Maximum number of tasks running at once (0 = one worker per task)
    #[arg(short = 'j', long)]
    pub max_workers: Option<usize>,

    /// Deadline for the whole batch in seconds
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Command to run, after `--`
    #[arg(last = true, required = true, value_name = "CMD")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn execute(args: ExecArgs, verbose: u8, quiet: bool, custom_config: Option<&str>) -> Result<()> {
    let output = Output::new(verbose > 0, quiet);

    let config = FanoutConfig::load_with_custom_config(custom_config)?;
    let mut settings = config.executor_settings()?;
    if let Some(max_workers) = args.max_workers {
        settings.max_workers = max_workers;
    }
    if let Some(timeout) = args.timeout {
        settings.timeout_secs = timeout;
    }

    let source = match &args.params {
        Some(path) => load_params(path)?,
        None => ArgSource::Single,
    };

    let command = ShellCommand::from_argv(&args.command)?;
    let program = command.program().to_string();
    let registry = builtin_registry(command)?;

    let mut executor = BatchExecutor::from_settings(&settings)
        .with_resolver(Arc::new(registry))
        .with_cancel_grace(CANCEL_GRACE);
    let batch = executor.prepare(SHELL_EXEC, source)?;
    output.verbose(&format!(
        "Running {} task(s) of `{}` on {} worker(s), deadline {:?}",
        batch.len(),
        program,
        executor.worker_count(batch.len()),
        executor.timeout()
    ));

    let progress = match args.format {
        OutputFormat::Text => output.progress_bar(batch.len() as u64, &program),
        OutputFormat::Json => indicatif::ProgressBar::hidden(),
    };
    let bar = progress.clone();
    executor = executor.with_progress(move |completed, _| bar.set_position(completed as u64));

    let outcome = executor.run(batch);
    progress.finish_and_clear();

    match outcome {
        Ok(values) => {
            print_values(&values, args.format)?;
            Ok(())
        }
        Err(BatchError::Failed(aggregate)) => {
            for failure in aggregate.failures() {
                output.failure(
                    &format!("task {} failed ({})", failure.index, failure.kind),
                    &failure.trace,
                );
            }
            output.error(&aggregate.to_string());
            std::process::exit(EXIT_FAILED);
        }
        Err(err @ BatchError::Timeout { .. }) => {
            output.error(&err.to_string());
            std::process::exit(EXIT_TIMEOUT);
        }
        Err(err) => Err(err.into()),
    }
}

fn load_params(path: &Path) -> Result<ArgSource> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Parameter file {} is not valid JSON", path.display()))?;
    Ok(ArgSource::from_json(value)?)
}

fn print_values(values: &[Value], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for value in values {
                match value {
                    Value::String(stdout) => print!("{stdout}"),
                    other => println!("{other}"),
                }
            }
        }
        OutputFormat::Json => {
            let report: Vec<Value> = values
                .iter()
                .enumerate()
                .map(|(index, stdout)| json!({ "index": index, "status": "ok", "stdout": stdout }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
