use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_level")]
    pub level: String,

    /// Mirror logs into `<log_dir>/rack-sync.log`
    #[serde(default)]
    pub file_enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_enabled && self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "logging.log_dir cannot be empty when file logging is enabled".into(),
            )));
        }
        Ok(())
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/logs")
}
