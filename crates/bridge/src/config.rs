//! Bridge configuration loading from TOML.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Timing knobs for the bridge.
///
/// All values have production defaults; a config file only needs to name the
/// ones it overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// How long an elicitation may stay unresolved before its caller is
    /// rejected.
    #[serde(default = "default_elicitation_timeout_secs")]
    pub elicitation_timeout_secs: u64,

    /// Poll interval while waiting for a guest frame's content window to
    /// attach before delivering an elicitation context.
    #[serde(default = "default_delivery_retry_ms")]
    pub delivery_retry_ms: u64,

    /// Delay between the content window appearing and the one delivery, so
    /// the guest's own listener has mounted.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Bound for a single RPC round trip to a guest's tool server.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_elicitation_timeout_secs() -> u64 {
    300
}

fn default_delivery_retry_ms() -> u64 {
    50
}

fn default_settle_delay_ms() -> u64 {
    25
}

fn default_rpc_timeout_secs() -> u64 {
    15
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            elicitation_timeout_secs: default_elicitation_timeout_secs(),
            delivery_retry_ms: default_delivery_retry_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    pub fn elicitation_timeout(&self) -> Duration {
        Duration::from_secs(self.elicitation_timeout_secs)
    }

    pub fn delivery_retry_interval(&self) -> Duration {
        Duration::from_millis(self.delivery_retry_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}
