//! querygrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryGridConfig {
    pub connection_state: Option<ConnectionStateConfig>,
}

/// `[connection_state]` — pool registry housekeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStateConfig {
    /// Pools not re-registered for this many seconds are evicted.
    pub eviction_duration_secs: Option<u64>,
    /// How often the housekeeper sweeps the registry.
    pub housekeeping_interval_secs: Option<u64>,
}

impl QueryGridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: QueryGridConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
