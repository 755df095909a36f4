//! Layered service configuration.
//!
//! Values come from an optional file (`config.toml`, or an explicit path in
//! TOML, JSON or YAML chosen by extension), overlaid by environment variables
//! named `SERVICEKIT__<SECTION>__<KEY>`. A `.env` file in the working
//! directory is read first, so its entries behave like real variables.
//!
//! Every field is optional; accessors supply the defaults.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub mod app;
pub mod limits;
pub mod servicebus;
pub mod validation;

pub use app::{AppConfig, AppInfoConfig};
pub use servicebus::{RetrySettings, ServicebusConfig};
pub use validation::{ConfigError, ConfigValidationError};

pub const ENV_PREFIX: &str = "SERVICEKIT";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_NAME: &str = "config";

/// Loads, deserializes and validates the configuration.
///
/// Without `path` a `config.{toml,json,yaml}` in the working directory is
/// used when present. An explicit `path` must exist.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    dotenv::dotenv().ok();
    load_from_sources(path, None)
}

/// Like [`load_config`] but reads environment overrides from `env` instead
/// of the process environment when it is given.
pub(crate) fn load_from_sources(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
    };

    let env_source = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(env);

    let config = Config::builder()
        .add_source(file_source)
        .add_source(env_source) // environment entries override file values
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate().map_err(ConfigError::Validation)?;

    log::debug!(
        "Loaded configuration for {} ({}) consuming {}",
        app_config.app().name(),
        app_config.app().environment(),
        app_config.servicebus().entity()
    );
    Ok(app_config)
}

/// Logging configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    level: Option<String>,
    file: Option<String>,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, file: Option<String>) -> Self {
        Self {
            level: Some(level.into()),
            file,
        }
    }

    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    /// Log file path; logs go to stderr when unset
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref().filter(|f| !f.trim().is_empty())
    }
}
