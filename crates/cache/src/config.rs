//! Page cache configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for one [`crate::PageCache`] instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache root; resolved from the environment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Disk quota for all cached pages
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Idle time after which a whole file cache is swept
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,

    /// Pages within this distance of the reader's position are never evicted
    #[serde(default = "default_protection_radius")]
    pub protection_radius: u32,

    /// Cadence of TTL sweeps when run by the scheduler
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Cadence of size-based eviction when run by the scheduler
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_size_bytes: default_max_size_bytes(),
            ttl_minutes: default_ttl_minutes(),
            protection_radius: default_protection_radius(),
            sweep_interval_secs: default_sweep_interval_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Config rooted at `root` with default limits
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    /// Parse a TOML config file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML config text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the sweeps meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(Error::configuration("max_size_bytes must be greater than 0"));
        }
        if self.ttl_minutes == 0 {
            return Err(Error::configuration("ttl_minutes must be greater than 0"));
        }
        if self.sweep_interval_secs == 0 || self.eviction_interval_secs == 0 {
            return Err(Error::configuration("scheduler intervals must be greater than 0"));
        }
        Ok(())
    }
}

fn default_max_size_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_ttl_minutes() -> u64 {
    30
}

fn default_protection_radius() -> u32 {
    25
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_eviction_interval_secs() -> u64 {
    60
}
