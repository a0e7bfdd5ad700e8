use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sleep before retry number `attempt` (0-based).
    ///
    /// Follows the ZooKeeper client's exponential backoff: the base delay is
    /// multiplied by a random factor in `1..=2^(attempt + 1)`, and the result
    /// is capped at `max_delay_ms`.
    pub fn delay_for(
        &self,
        attempt: usize,
    ) -> Duration {
        use rand::Rng;

        let shift = attempt.min(29) as u32 + 1;
        let factor = rand::thread_rng().gen_range(1..=(1u64 << shift));
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub(crate) fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} max_retries must be > 0"
            ))));
        }

        if self.timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} timeout_ms must be > 0"
            ))));
        }

        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} base_delay_ms must be > 0"
            ))));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "{} max_delay_ms {} must be >= base_delay_ms {}",
                name, self.max_delay_ms, self.base_delay_ms
            ))));
        }

        Ok(())
    }
}

/// Divide strategies by operation
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RetryPolicies {
    /// Session establishment against the coordination service
    #[serde(default)]
    pub connect: BackoffPolicy,
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.connect.validate("connect")
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    15000
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}
