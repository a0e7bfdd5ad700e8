//! Command line surface of the daemon.
//!
//! Flags override whatever the configuration file and environment produced.
//! The positional form `<endpoint> <base-path> <output>` is kept for
//! compatibility with existing deployment scripts; explicit flags win over
//! positional values.


use std::path::PathBuf;

use clap::Parser;

use crate::RackSyncConfig;
use crate::Result;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "rack-sync",
    author,
    version,
    about = "Keeps a rack topology file in sync with a ZooKeeper subtree",
    long_about = None
)]
pub struct Cli {
    /// Extra configuration file layered over `CONFIG_PATH`
    #[arg(long)]
    pub config: Option<String>,

    /// Coordination service connect string, e.g. `zk1:2181,zk2:2181`
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Watched subtree; one child per host
    #[arg(long)]
    pub base_path: Option<String>,

    /// Topology file to maintain
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(value_name = "ENDPOINT BASE_PATH OUTPUT", num_args = 0..=3)]
    pub positional: Vec<String>,
}

impl Cli {
    /// Writes command line values into `config`.
    pub fn apply(
        &self,
        mut config: RackSyncConfig,
    ) -> RackSyncConfig {
        let positional = |idx: usize| self.positional.get(idx).cloned();
        let endpoint = self.endpoint.clone().or_else(|| positional(0));
        let base_path = self.base_path.clone().or_else(|| positional(1));
        let output = self.output.clone().or_else(|| positional(2).map(PathBuf::from));

        if let Some(endpoint) = endpoint {
            config.coordination.endpoint = endpoint;
        }
        if let Some(base_path) = base_path {
            config.coordination.base_path = base_path;
        }
        if let Some(output) = output {
            config.topology.output_path = output;
        }
        config
    }

    /// Loads, overrides and validates the full configuration.
    pub fn load_config(&self) -> Result<RackSyncConfig> {
        let mut config = RackSyncConfig::new()?;
        if let Some(path) = &self.config {
            config = config.with_override_config(path)?;
        }
        self.apply(config).validate()
    }
}
