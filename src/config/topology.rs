use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyConfig {
    /// Destination of the rendered `<address> <rack>` file
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
        }
    }
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "topology.output_path cannot be empty".into(),
            )));
        }

        if self.output_path.file_name().is_none() {
            return Err(Error::Config(ConfigError::Message(format!(
                "topology.output_path {} must name a file",
                self.output_path.display()
            ))));
        }

        Ok(())
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("/tmp/rack_topology.data")
}
