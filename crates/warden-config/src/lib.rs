//! Configuration parsing and validation for wardend
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Tracking, lock screen and watchdog tuning
//! - Validation with clear error messages
//!
//! Per-app limits are not part of the file; they live in the durable store
//! and are changed through the command surface.

mod schema;
mod settings;
mod validation;

pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for warden_util::WardenError {
    fn from(e: ConfigError) -> Self {
        warden_util::WardenError::config(e.to_string())
    }
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Like [`load_config`], but a missing file yields the defaults
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(Settings::default());
    }
    load_config(path)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Settings> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Settings::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_util::AppId;

    #[test]
    fn parse_minimal_config() {
        let settings = parse_config("config_version = 1").unwrap();
        assert_eq!(settings.tracking.poll_interval, Duration::from_secs(1));
        assert!(settings.tracking.system_apps.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let config = r#"
            config_version = 1

            [service]
            data_dir = "/var/lib/wardend"
            home_command = ["swaymsg", "workspace", "1"]

            [tracking]
            poll_interval_ms = 500
            lookback_seconds = 3
            system_apps = ["launcher", "wardend"]

            [lock_screen]
            debounce_ms = 3000

            [watchdog]
            stale_after_seconds = 180
            auto_restart = false
        "#;

        let settings = parse_config(config).unwrap();
        assert_eq!(
            settings.service.data_dir,
            std::path::PathBuf::from("/var/lib/wardend")
        );
        assert_eq!(settings.tracking.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.tracking.lookback, Duration::from_secs(3));
        assert_eq!(
            settings.tracking.system_apps,
            vec![AppId::new("launcher"), AppId::new("wardend")]
        );
        assert_eq!(settings.lock_screen.debounce, Duration::from_secs(3));
        assert_eq!(settings.watchdog.stale_after, Duration::from_secs(180));
        assert!(!settings.watchdog.auto_restart);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let config = r#"
            config_version = 1

            [watchdog]
            heartbeat_interval_seconds = 0
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_config_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.watchdog, WatchdogSettings::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\n[lock_screen]\ndebounce_ms = 100\n").unwrap();

        let settings = load_config(&path).unwrap();
        assert_eq!(settings.lock_screen.debounce, Duration::from_millis(100));
    }
}
