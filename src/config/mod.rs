//! Configuration management for backend connections and coordination watches.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod connection;
mod coordination;
mod retry;
pub use connection::*;
pub use coordination::*;
pub use retry::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable prefix for overrides, e.g. `BACKEND__COORDINATION__SEND_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "BACKEND";

/// Main configuration container
///
/// Combines all sections with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Document store connections
    #[serde(default)]
    pub mongo: Vec<ConnectionConfig>,
    /// Cache connections
    #[serde(default)]
    pub redis: Vec<ConnectionConfig>,
    /// Coordination session and watched paths
    #[serde(default)]
    pub coordination: CoordinationConfig,
}

impl Settings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `BACKEND__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so that further overrides can be applied with
    /// `with_override_config()`. Callers MUST call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/backends.toml");
    /// let settings = Settings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        validate_connections("mongo", &self.mongo)?;
        for config in &self.mongo {
            require_mongo_target(config)?;
        }
        validate_connections("redis", &self.redis)?;
        self.coordination.validate()?;
        Ok(self)
    }
}

/// A document store connection is always bound to one database and collection
pub(crate) fn require_mongo_target(config: &ConnectionConfig) -> Result<()> {
    if config.database.as_deref().map_or(true, str::is_empty) {
        return Err(crate::Error::InvalidConfig(format!(
            "mongo connection {} must name a database",
            config.tag
        )));
    }
    if config.sub_resource.as_deref().map_or(true, str::is_empty) {
        return Err(crate::Error::InvalidConfig(format!(
            "mongo connection {} must name a collection",
            config.tag
        )));
    }
    if config.credentials.password.is_some() && config.credentials.username.is_none() {
        return Err(crate::Error::InvalidConfig(format!(
            "mongo connection {} sets a password without a username",
            config.tag
        )));
    }
    Ok(())
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
