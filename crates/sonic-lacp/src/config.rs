//! Engine configuration.
//!
//! Loaded from a TOML file; every field falls back to its default when
//! absent. Default location: /etc/sonic/lacpd.toml

use crate::error::{LacpError, Result};
use crate::types::{AdSelect, LacpRate, MAX_USER_PORT_KEY};
use serde::{Deserialize, Serialize};
use sonic_types::LinkSpeed;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/lacpd.toml";

/// Upper bound on ports per device.
pub const MAX_PORTS_LIMIT: usize = 1024;

/// Per-speed bandwidth override used by aggregator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthOverride {
    pub speed: LinkSpeed,
    pub mbps: u32,
}

/// Complete LACP engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LacpConfig {
    /// Tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Rate we ask partners to transmit at
    #[serde(default)]
    pub lacp_rate: LacpRate,

    /// Aggregator selection policy
    #[serde(default)]
    pub ad_select: AdSelect,

    /// Active ports the active aggregator needs for carrier
    #[serde(default)]
    pub min_links: usize,

    /// Actor system priority
    #[serde(default = "default_system_priority")]
    pub system_priority: u16,

    /// User part of the port key (upper ten bits)
    #[serde(default)]
    pub user_port_key: u16,

    /// Actor port priority
    #[serde(default = "default_port_priority")]
    pub port_priority: u16,

    /// Number of port slots on the device
    #[serde(default = "default_max_ports")]
    pub max_ports: usize,

    /// Bandwidth overrides per link speed
    #[serde(default)]
    pub bandwidth: Vec<BandwidthOverride>,
}

fn default_tick_interval() -> u64 {
    100
}

fn default_system_priority() -> u16 {
    0xffff
}

fn default_port_priority() -> u16 {
    0xff
}

fn default_max_ports() -> usize {
    16
}

impl Default for LacpConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            lacp_rate: LacpRate::default(),
            ad_select: AdSelect::default(),
            min_links: 0,
            system_priority: default_system_priority(),
            user_port_key: 0,
            port_priority: default_port_priority(),
            max_ports: default_max_ports(),
            bandwidth: Vec::new(),
        }
    }
}

impl LacpConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::from_file(path) {
            Err(LacpError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            LacpError::config(
                path.display().to_string(),
                format!("failed to parse: {e}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LacpError::config("config", format!("failed to serialize: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Ticks per second for the configured interval
    pub fn ticks_per_sec(&self) -> u32 {
        if self.tick_interval_ms == 0 {
            return 0;
        }
        u32::try_from(1000 / self.tick_interval_ms).unwrap_or(u32::MAX)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=333).contains(&self.tick_interval_ms) {
            return Err(LacpError::config(
                "tick_interval_ms",
                "must be 1-333 so that at least 3 ticks run per second",
            ));
        }

        if self.user_port_key > MAX_USER_PORT_KEY {
            return Err(LacpError::config(
                "user_port_key",
                format!("must be 0-{MAX_USER_PORT_KEY}"),
            ));
        }

        if !(1..=MAX_PORTS_LIMIT).contains(&self.max_ports) {
            return Err(LacpError::config(
                "max_ports",
                format!("must be 1-{MAX_PORTS_LIMIT}"),
            ));
        }

        if let Some(entry) = self.bandwidth.iter().find(|b| b.speed == LinkSpeed::Unknown) {
            return Err(LacpError::config(
                "bandwidth",
                format!("override for unknown speed ({} Mbps)", entry.mbps),
            ));
        }

        Ok(())
    }
}
