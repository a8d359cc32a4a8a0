use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

pub mod config;
pub mod exec;
pub mod version;

#[derive(Parser)]
#[command(
    name = "fanout",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run one command over many parameter sets on a bounded worker pool",
    long_about = "fanout runs a command once per parameter set on a bounded pool of worker \
                  threads, returns the results in submission order, reports every failure \
                  together and enforces a deadline on the whole batch."
)]
pub struct Cli {
    /// Run as if started in <DIR> instead of current working directory
    #[arg(short = 'C', long = "directory", global = true)]
    pub directory: Option<String>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command once per parameter set
    Exec(exec::ExecArgs),
    /// Configuration management
    Config(config::ConfigArgs),
    /// Show version information
    Version(version::VersionArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        // Change directory if specified
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        // Set up logging based on verbosity
        setup_logging(self.verbose, self.quiet);

        match self.command {
            Some(Commands::Exec(args)) => {
                exec::execute(args, self.verbose, self.quiet, self.config.as_deref())
            }
            Some(Commands::Config(args)) => config::execute(args, self.config.as_deref()),
            Some(Commands::Version(args)) => version::execute(args, self.quiet),
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    // Logs go to stderr so stdout stays parseable in json mode
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
