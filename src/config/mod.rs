//! Configuration management for the rack sync daemon.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod coordination;
mod logging;
mod retry;
mod topology;
pub use coordination::*;
pub use logging::*;
pub use retry::*;
pub use topology::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable prefix, e.g. `RACK_SYNC__COORDINATION__ENDPOINT`
pub const ENV_PREFIX: &str = "RACK_SYNC";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RackSyncConfig {
    /// Coordination service endpoint and watched subtree
    #[serde(default)]
    pub coordination: CoordinationConfig,
    /// Output file location
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Retry policies for coordination operations
    #[serde(default)]
    pub retry: RetryPolicies,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RackSyncConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `RACK_SYNC__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so callers can layer more overrides with
    /// `with_override_config()`. Call `validate()` before use.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
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
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// # Errors
    /// Returns the first failure reported by any section.
    pub fn validate(self) -> Result<Self> {
        self.coordination.validate()?;
        self.topology.validate()?;
        self.retry.validate()?;
        self.watcher.validate()?;
        self.logging.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
