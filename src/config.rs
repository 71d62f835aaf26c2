//! Configuration for the link stack
//!
//! Loaded from a TOML file; every field has a default so a missing file or a
//! partial file still yields a working configuration. Durations are stored as
//! integer milliseconds in the file and exposed as [`Duration`] accessors.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: LinkConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        Ok(())
    }
}

/// Peer discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port presence announcements arrive on
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    /// Peers not heard from within this window are swept out
    #[serde(default = "default_peer_stale_timeout_ms")]
    pub peer_stale_timeout_ms: u64,
    /// How often the registry sweep runs
    #[serde(default = "default_peer_sweep_interval_ms")]
    pub peer_sweep_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: default_discovery_port(),
            peer_stale_timeout_ms: default_peer_stale_timeout_ms(),
            peer_sweep_interval_ms: default_peer_sweep_interval_ms(),
        }
    }
}

impl DiscoveryConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_stale_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.peer_sweep_interval_ms)
    }
}

/// TCP session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port the headset listens on
    #[serde(default = "default_session_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Automatic retries after an I/O failure before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Pause between automatic retries
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_session_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Deviation detection and reroute pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Deviations beyond this count as off-route
    #[serde(default = "default_off_route_threshold_m")]
    pub off_route_threshold_m: f64,
    /// Within this of any route vertex counts as clearly on-path
    #[serde(default = "default_on_path_tolerance_m")]
    pub on_path_tolerance_m: f64,
    /// Deviation checks settle this long before evaluating
    #[serde(default = "default_reroute_debounce_ms")]
    pub reroute_debounce_ms: u64,
    /// Minimum spacing between triggered reroutes
    #[serde(default = "default_min_reroute_interval_ms")]
    pub min_reroute_interval_ms: u64,
    /// Off-route evaluations required to confirm a deviation
    #[serde(default = "default_consecutive_checks")]
    pub consecutive_checks: u32,
    /// How long RerouteComplete lingers before reverting to idle
    #[serde(default = "default_reroute_complete_grace_ms")]
    pub reroute_complete_grace_ms: u64,
    /// Scale from meters to headset waypoint units
    #[serde(default = "default_units_per_meter")]
    pub units_per_meter: f64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            off_route_threshold_m: default_off_route_threshold_m(),
            on_path_tolerance_m: default_on_path_tolerance_m(),
            reroute_debounce_ms: default_reroute_debounce_ms(),
            min_reroute_interval_ms: default_min_reroute_interval_ms(),
            consecutive_checks: default_consecutive_checks(),
            reroute_complete_grace_ms: default_reroute_complete_grace_ms(),
            units_per_meter: default_units_per_meter(),
        }
    }
}

impl NavigationConfig {
    pub fn reroute_debounce(&self) -> Duration {
        Duration::from_millis(self.reroute_debounce_ms)
    }

    pub fn min_reroute_interval(&self) -> Duration {
        Duration::from_millis(self.min_reroute_interval_ms)
    }

    pub fn reroute_complete_grace(&self) -> Duration {
        Duration::from_millis(self.reroute_complete_grace_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_discovery_port() -> u16 {
    8888
}

fn default_peer_stale_timeout_ms() -> u64 {
    10_000
}

fn default_peer_sweep_interval_ms() -> u64 {
    2_000
}

fn default_session_port() -> u16 {
    9898
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_off_route_threshold_m() -> f64 {
    30.0
}

fn default_on_path_tolerance_m() -> f64 {
    15.0
}

fn default_reroute_debounce_ms() -> u64 {
    2_000
}

fn default_min_reroute_interval_ms() -> u64 {
    10_000
}

fn default_consecutive_checks() -> u32 {
    3
}

fn default_reroute_complete_grace_ms() -> u64 {
    3_000
}

fn default_units_per_meter() -> f64 {
    0.01
}

fn default_log_level() -> String {
    "info".to_string()
}
