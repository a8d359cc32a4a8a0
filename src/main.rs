use anyhow::Result;
use clap::Parser;
use fanout::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
