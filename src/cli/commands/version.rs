use anyhow::Result;
use clap::Args;

use crate::cli::Output;

#[derive(Args)]
pub struct VersionArgs {
    /// Show detailed version information
    #[arg(short = 'd', long = "detailed")]
    pub detailed: bool,
}

pub fn execute(args: VersionArgs, quiet: bool) -> Result<()> {
    if !args.detailed {
        println!("{} {}", crate::PKG_NAME, crate::VERSION);
        return Ok(());
    }

    let output = Output::new(false, quiet);
    output.header("fanout version information");
    output.status_indicator(
        "VERSION",
        &format!("{} v{}", crate::PKG_NAME, crate::VERSION),
        true,
    );
    output.blank_line();

    output.category("About");
    output.key_value("Description:", crate::PKG_DESCRIPTION);
    output.key_value("Repository:", env!("CARGO_PKG_REPOSITORY"));
    output.key_value("License:", env!("CARGO_PKG_LICENSE"));
    output.blank_line();

    output.category("Build Information");
    output.key_value("Rust edition:", "2024");
    output.key_value("Target:", std::env::consts::ARCH);
    output.key_value(
        "Profile:",
        if cfg!(debug_assertions) { "debug" } else { "release" },
    );
    Ok(())
}
