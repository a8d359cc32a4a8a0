use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Json, Toml, Yaml},
};
use std::path::Path;

use super::ExecutorSettings;
use super::smart_load;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

pub struct FanoutConfig {
    figment: Figment,
}

impl FanoutConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_custom_config(None)
    }

    pub fn load_with_custom_config(custom_config: Option<&str>) -> Result<Self> {
        tracing::trace!("CONFIG LOAD: Starting");

        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG)); // Embedded defaults

        // A custom config replaces the user and repository files
        if let Some(custom_path) = custom_config {
            if !Path::new(custom_path).exists() {
                tracing::warn!("Config file {} not found, using defaults", custom_path);
            }
            figment = figment.merge(smart_load::auto(custom_path));
        } else {
            let user = Self::user_config_base_path();
            figment = figment
                .merge(Toml::file(format!("{}.toml", user)))
                .merge(Json::file(format!("{}.json", user)))
                .merge(Yaml::file(format!("{}.yaml", user)))
                .merge(Yaml::file(format!("{}.yml", user)))
                .merge(Toml::file("fanout.toml"))
                .merge(Json::file("fanout.json"))
                .merge(Yaml::file("fanout.yaml"))
                .merge(Yaml::file("fanout.yml"));
        }

        // Environment variables always have highest priority
        figment = figment.merge(Env::prefixed("FANOUT_").split("__"));

        Ok(FanoutConfig { figment })
    }

    /// Typed `[executor]` section
    pub fn executor_settings(&self) -> Result<ExecutorSettings> {
        self.figment
            .extract_inner("executor")
            .context("Invalid [executor] configuration")
    }

    /// Get a nested object/section as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }

    /// Get the full merged configuration as a structured value
    pub fn get_full_config(&self) -> Result<serde_json::Value> {
        Ok(self.figment.extract()?)
    }

    fn user_config_base_path() -> String {
        match std::env::var("HOME") {
            Ok(home) => format!("{}/.config/fanout/config", home),
            Err(_) => "~/.config/fanout/config".to_string(),
        }
    }
}
