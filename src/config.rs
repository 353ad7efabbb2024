//! Configuration types for mft-engine
//!
//! Configuration is an explicit value handed to each component at
//! construction; nothing is read from global state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network timing used by the transfer runner and the backpressure writer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Standard network wait unit (default: 200 ms)
    #[serde(default = "default_net_op_timeout", with = "duration_ms_serde")]
    pub net_op_timeout: Duration,

    /// Multiplier applied to `net_op_timeout` when waiting for the peer's
    /// request acknowledgement (default: 10)
    #[serde(default = "default_handshake_wait_factor")]
    pub handshake_wait_factor: u32,

    /// Fallback re-check interval while the channel is not writable (default: 10 ms)
    #[serde(default = "default_retry_interval", with = "duration_ms_serde")]
    pub write_poll_interval: Duration,
}

impl NetworkConfig {
    /// Bound on the wait for the peer's acknowledgement of a finished request
    pub fn handshake_wait(&self) -> Duration {
        self.net_op_timeout * self.handshake_wait_factor
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            net_op_timeout: default_net_op_timeout(),
            handshake_wait_factor: default_handshake_wait_factor(),
            write_poll_interval: default_retry_interval(),
        }
    }
}

/// Task execution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Sleep before the single retry of a transient spawn failure (default: 10 ms)
    #[serde(default = "default_retry_interval", with = "duration_ms_serde")]
    pub retry_interval: Duration,

    /// Bound on joining the output reader when the task has no timeout (default: 1 s)
    #[serde(default = "default_reader_join_timeout", with = "duration_ms_serde")]
    pub reader_join_timeout: Duration,

    /// Delegate commands to an out-of-process execution helper when one is attached
    #[serde(default)]
    pub use_local_exec: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            reader_join_timeout: default_reader_join_timeout(),
            use_local_exec: false,
        }
    }
}

/// Main configuration for the transfer engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Network timing
    #[serde(default)]
    pub network: NetworkConfig,

    /// Task execution
    #[serde(default)]
    pub tasks: TaskConfig,
}

impl Config {
    /// Check values that would make waits degenerate
    pub fn validate(&self) -> Result<()> {
        if self.network.handshake_wait_factor == 0 {
            return Err(Error::Config {
                message: "handshake_wait_factor must be at least 1".to_string(),
                key: Some("network.handshake_wait_factor".to_string()),
            });
        }
        if self.network.write_poll_interval.is_zero() {
            return Err(Error::Config {
                message: "write_poll_interval must be non-zero".to_string(),
                key: Some("network.write_poll_interval".to_string()),
            });
        }
        if self.network.net_op_timeout.is_zero() {
            return Err(Error::Config {
                message: "net_op_timeout must be non-zero".to_string(),
                key: Some("network.net_op_timeout".to_string()),
            });
        }
        Ok(())
    }
}

// Default value functions
fn default_net_op_timeout() -> Duration {
    Duration::from_millis(200)
}

fn default_handshake_wait_factor() -> u32 {
    10
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_reader_join_timeout() -> Duration {
    Duration::from_secs(1)
}

// Duration serialization helper (integer milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
