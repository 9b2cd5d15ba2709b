//! Configuration management for Roomlink

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// SDK configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SdkConfig {
    pub log_level: String,
    pub json_logs: bool,
    /// Name given to the dedicated callback delivery thread
    pub callback_thread_name: String,
    /// Video tracks acquire the shared render context when set
    pub share_render_context: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            callback_thread_name: "roomlink-callbacks".to_string(),
            share_render_context: true,
        }
    }
}

impl SdkConfig {
    /// Load configuration from `.env` and `ROOMLINK_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self::build(log_level, config::Environment::with_prefix("ROOMLINK"))
    }

    /// Load configuration from an explicit variable map instead of the process
    /// environment. Keys use the same `ROOMLINK_*` names.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let log_level = vars
            .get("LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| "info".to_string());
        Self::build(
            log_level,
            config::Environment::with_prefix("ROOMLINK").source(Some(vars)),
        )
    }

    fn build(log_level: String, environment: config::Environment) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("log_level", log_level)?
            .set_default("json_logs", defaults.json_logs)?
            .set_default("callback_thread_name", defaults.callback_thread_name)?
            .set_default("share_render_context", defaults.share_render_context)?
            .add_source(environment.try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.callback_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "callback_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}
