//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub tracking: RawTrackingConfig,

    #[serde(default)]
    pub lock_screen: RawLockScreenConfig,

    #[serde(default)]
    pub watchdog: RawWatchdogConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Command that brings the device back to its home surface
    pub home_command: Option<Vec<String>>,

    /// Command that shows the lock screen; receives app id, used and limit
    /// minutes as trailing arguments
    pub lock_command: Option<Vec<String>>,
}

/// Foreground tracking settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTrackingConfig {
    /// Poll fallback interval (default: 1000)
    pub poll_interval_ms: Option<u64>,

    /// Poll lookback window (default: 5)
    pub lookback_seconds: Option<u64>,

    /// Open-session flush interval (default: 30)
    pub flush_interval_seconds: Option<u64>,

    /// Sessions shorter than this are discarded (default: 1000)
    pub noise_threshold_ms: Option<u64>,

    /// Identities never tracked (launcher, shell, wardend itself)
    #[serde(default)]
    pub system_apps: Vec<String>,
}

/// Lock screen settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLockScreenConfig {
    /// Minimum gap between two presentations (default: 2000)
    pub debounce_ms: Option<u64>,
}

/// Watchdog settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWatchdogConfig {
    pub heartbeat_interval_seconds: Option<u64>,
    pub check_interval_seconds: Option<u64>,
    pub guaranteed_check_interval_seconds: Option<u64>,
    pub stale_after_seconds: Option<u64>,
    pub retry_delay_seconds: Option<u64>,
    pub prompt_interval_seconds: Option<u64>,

    /// Initial value of the persisted auto-restart flag
    pub auto_restart: Option<bool>,
}

impl RawConfig {
    /// An empty config at the current version
    pub fn empty() -> Self {
        Self {
            config_version: crate::CURRENT_CONFIG_VERSION,
            service: RawServiceConfig::default(),
            tracking: RawTrackingConfig::default(),
            lock_screen: RawLockScreenConfig::default(),
            watchdog: RawWatchdogConfig::default(),
        }
    }
}
