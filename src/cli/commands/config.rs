use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::FanoutConfig;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display current merged configuration as JSON
    Show,
    /// Get a configuration value or section
    Get { key: String },
}

pub fn execute(args: ConfigArgs, custom_config: Option<&str>) -> Result<()> {
    let config = FanoutConfig::load_with_custom_config(custom_config)?;

    match args.command {
        ConfigCommand::Show => {
            let merged = config.get_full_config()?;
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
        ConfigCommand::Get { key } => {
            let value = config.get_section(&key)?;
            match value {
                serde_json::Value::String(s) => println!("{s}"),
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    println!("{}", serde_json::to_string_pretty(&value)?)
                }
                other => println!("{other}"),
            }
        }
    }
    Ok(())
}
