use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Where the host -> rack assignments live
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinationConfig {
    /// Quorum connect string, e.g. `zk1:2181,zk2:2181,zk3:2181`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Parent node; one child per managed host
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            base_path: default_base_path(),
        }
    }
}

impl CoordinationConfig {
    /// Validates the coordination endpoint and base path
    /// # Errors
    /// Returns `Error::Config` when:
    /// - the endpoint is empty
    /// - the base path is relative or ends with `/`
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "coordination.endpoint cannot be empty".into(),
            )));
        }

        if !self.base_path.starts_with('/') {
            return Err(Error::Config(ConfigError::Message(format!(
                "coordination.base_path {} must be absolute",
                self.base_path
            ))));
        }

        if self.base_path.len() > 1 && self.base_path.ends_with('/') {
            return Err(Error::Config(ConfigError::Message(format!(
                "coordination.base_path {} must not end with '/'",
                self.base_path
            ))));
        }

        Ok(())
    }
}

/// Tree watcher tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Capacity of the change-signal channel between watcher and reconciler
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            signal_buffer: default_signal_buffer(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.signal_buffer == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watcher.signal_buffer must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    "127.0.0.1:2181".to_string()
}
fn default_base_path() -> String {
    "/hbase-operator".to_string()
}
fn default_signal_buffer() -> usize {
    128
}
