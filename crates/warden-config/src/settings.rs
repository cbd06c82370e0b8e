//! Validated settings

use crate::schema::RawConfig;
use std::path::PathBuf;
use std::time::Duration;
use warden_util::AppId;

/// Validated settings ready for use by the service
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub service: ServiceSettings,
    pub tracking: TrackingSettings,
    pub lock_screen: LockScreenSettings,
    pub watchdog: WatchdogSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub data_dir: PathBuf,
    pub home_command: Option<Vec<String>>,
    pub lock_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub poll_interval: Duration,
    pub lookback: Duration,
    pub flush_interval: Duration,
    pub noise_threshold: Duration,
    pub system_apps: Vec<AppId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockScreenSettings {
    pub debounce: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogSettings {
    pub heartbeat_interval: Duration,
    pub check_interval: Duration,
    pub guaranteed_check_interval: Duration,
    pub stale_after: Duration,
    pub retry_delay: Duration,
    pub prompt_interval: Duration,
    pub auto_restart: bool,
}

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_LOOKBACK_SECONDS: u64 = 5;
pub const DEFAULT_FLUSH_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_NOISE_THRESHOLD_MS: u64 = 1000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_CHECK_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_GUARANTEED_CHECK_INTERVAL_SECONDS: u64 = 15 * 60;
pub const DEFAULT_STALE_AFTER_SECONDS: u64 = 120;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;
pub const DEFAULT_PROMPT_INTERVAL_SECONDS: u64 = 2 * 60 * 60;

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let service = ServiceSettings {
            data_dir: raw
                .service
                .data_dir
                .unwrap_or_else(warden_util::default_data_dir),
            home_command: raw.service.home_command,
            lock_command: raw.service.lock_command,
        };

        let t = raw.tracking;
        let tracking = TrackingSettings {
            poll_interval: Duration::from_millis(
                t.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            lookback: Duration::from_secs(t.lookback_seconds.unwrap_or(DEFAULT_LOOKBACK_SECONDS)),
            flush_interval: Duration::from_secs(
                t.flush_interval_seconds
                    .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECONDS),
            ),
            noise_threshold: Duration::from_millis(
                t.noise_threshold_ms.unwrap_or(DEFAULT_NOISE_THRESHOLD_MS),
            ),
            system_apps: t.system_apps.into_iter().map(AppId::new).collect(),
        };

        let lock_screen = LockScreenSettings {
            debounce: Duration::from_millis(
                raw.lock_screen.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
            ),
        };

        let w = raw.watchdog;
        let secs = |v: Option<u64>, default: u64| Duration::from_secs(v.unwrap_or(default));
        let watchdog = WatchdogSettings {
            heartbeat_interval: secs(
                w.heartbeat_interval_seconds,
                DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            ),
            check_interval: secs(w.check_interval_seconds, DEFAULT_CHECK_INTERVAL_SECONDS),
            guaranteed_check_interval: secs(
                w.guaranteed_check_interval_seconds,
                DEFAULT_GUARANTEED_CHECK_INTERVAL_SECONDS,
            ),
            stale_after: secs(w.stale_after_seconds, DEFAULT_STALE_AFTER_SECONDS),
            retry_delay: secs(w.retry_delay_seconds, DEFAULT_RETRY_DELAY_SECONDS),
            prompt_interval: secs(w.prompt_interval_seconds, DEFAULT_PROMPT_INTERVAL_SECONDS),
            auto_restart: w.auto_restart.unwrap_or(true),
        };

        Self {
            service,
            tracking,
            lock_screen,
            watchdog,
        }
    }

    /// Override the data directory (CLI flag or environment)
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.service.data_dir = data_dir;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_raw(RawConfig::empty())
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Settings::default().tracking
    }
}

impl Default for LockScreenSettings {
    fn default() -> Self {
        Settings::default().lock_screen
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Settings::default().watchdog
    }
}
