//! vitalgrid.toml engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub sweeper: SweeperConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_reports_per_entity: usize,
    pub max_reports_total: usize,
    pub max_description_len: usize,
    pub store_retry_attempts: u32,
    pub store_retry_backoff: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval: String,
    pub batch_size: usize,
    /// How long reports of an entity missing from the catalog are kept.
    /// Unset keeps them forever.
    pub orphan_grace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub depth_limit: usize,
    pub default_timeout: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_reports_per_entity: 100,
            max_reports_total: 1_000_000,
            max_description_len: 4096,
            store_retry_attempts: 3,
            store_retry_backoff: "10ms".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn retry_backoff(&self) -> Duration {
        parse_duration(&self.store_retry_backoff).unwrap_or(Duration::from_millis(10))
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "30s".to_string(),
            batch_size: 256,
            orphan_grace: None,
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn orphan_grace(&self) -> Option<Duration> {
        self.orphan_grace
            .as_deref()
            .map(|s| parse_duration(s).unwrap_or(Duration::from_secs(600)))
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            depth_limit: 16,
            default_timeout: "30s".to_string(),
        }
    }
}

impl QueryConfig {
    pub fn default_timeout(&self) -> Duration {
        parse_duration(&self.default_timeout).unwrap_or(Duration::from_secs(30))
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse "500ms", "30s", "5m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
