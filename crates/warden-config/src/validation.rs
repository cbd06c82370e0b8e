//! Configuration validation

use crate::schema::RawConfig;
use crate::settings::*;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("System app id cannot be empty")]
    EmptySystemApp,

    #[error("Duplicate system app id: {0}")]
    DuplicateSystemApp(String),

    #[error("Command for {0} cannot be empty")]
    EmptyCommand(&'static str),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let t = &config.tracking;
    let w = &config.watchdog;

    let intervals = [
        ("tracking.poll_interval_ms", t.poll_interval_ms),
        ("tracking.lookback_seconds", t.lookback_seconds),
        ("tracking.flush_interval_seconds", t.flush_interval_seconds),
        ("lock_screen.debounce_ms", config.lock_screen.debounce_ms),
        ("watchdog.heartbeat_interval_seconds", w.heartbeat_interval_seconds),
        ("watchdog.check_interval_seconds", w.check_interval_seconds),
        (
            "watchdog.guaranteed_check_interval_seconds",
            w.guaranteed_check_interval_seconds,
        ),
        ("watchdog.stale_after_seconds", w.stale_after_seconds),
        ("watchdog.retry_delay_seconds", w.retry_delay_seconds),
        ("watchdog.prompt_interval_seconds", w.prompt_interval_seconds),
    ];
    for (field, value) in intervals {
        if value == Some(0) {
            errors.push(ValidationError::ZeroInterval { field });
        }
    }

    let lookback = t.lookback_seconds.unwrap_or(DEFAULT_LOOKBACK_SECONDS);
    if !(3..=5).contains(&lookback) {
        errors.push(ValidationError::InvalidValue {
            field: "tracking.lookback_seconds",
            message: format!("{} is outside 3..=5", lookback),
        });
    }

    let flush_ms = t
        .flush_interval_seconds
        .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECONDS)
        .saturating_mul(1000);
    let noise_ms = t.noise_threshold_ms.unwrap_or(DEFAULT_NOISE_THRESHOLD_MS);
    if flush_ms != 0 && flush_ms <= noise_ms {
        errors.push(ValidationError::InvalidValue {
            field: "tracking.flush_interval_seconds",
            message: format!(
                "flush interval ({}ms) must exceed the noise threshold ({}ms)",
                flush_ms, noise_ms
            ),
        });
    }

    let heartbeat = w
        .heartbeat_interval_seconds
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECONDS);
    let stale_after = w.stale_after_seconds.unwrap_or(DEFAULT_STALE_AFTER_SECONDS);
    if stale_after != 0 && stale_after <= heartbeat {
        errors.push(ValidationError::InvalidValue {
            field: "watchdog.stale_after_seconds",
            message: format!(
                "{}s must exceed the heartbeat interval ({}s)",
                stale_after, heartbeat
            ),
        });
    }

    let mut seen = HashSet::new();
    for app in &t.system_apps {
        if app.trim().is_empty() {
            errors.push(ValidationError::EmptySystemApp);
        } else if !seen.insert(app.as_str()) {
            errors.push(ValidationError::DuplicateSystemApp(app.clone()));
        }
    }

    if config.service.home_command.as_ref().is_some_and(|c| c.is_empty()) {
        errors.push(ValidationError::EmptyCommand("service.home_command"));
    }
    if config.service.lock_command.as_ref().is_some_and(|c| c.is_empty()) {
        errors.push(ValidationError::EmptyCommand("service.lock_command"));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_valid() {
        assert!(validate_config(&RawConfig::empty()).is_empty());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = RawConfig::empty();
        config.tracking.poll_interval_ms = Some(0);

        let errors = validate_config(&config);
        assert_eq!(
            errors,
            vec![ValidationError::ZeroInterval {
                field: "tracking.poll_interval_ms"
            }]
        );
    }

    #[test]
    fn lookback_out_of_range() {
        let mut config = RawConfig::empty();
        config.tracking.lookback_seconds = Some(10);

        let errors = validate_config(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidValue {
                field: "tracking.lookback_seconds",
                ..
            }]
        ));
    }

    #[test]
    fn stale_after_must_exceed_heartbeat() {
        let mut config = RawConfig::empty();
        config.watchdog.heartbeat_interval_seconds = Some(60);
        config.watchdog.stale_after_seconds = Some(60);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn flush_must_exceed_noise_threshold() {
        let mut config = RawConfig::empty();
        config.tracking.flush_interval_seconds = Some(1);
        config.tracking.noise_threshold_ms = Some(2000);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn duplicate_and_empty_system_apps() {
        let mut config = RawConfig::empty();
        config.tracking.system_apps = vec!["launcher".into(), " ".into(), "launcher".into()];

        let errors = validate_config(&config);
        assert!(errors.contains(&ValidationError::EmptySystemApp));
        assert!(errors.contains(&ValidationError::DuplicateSystemApp("launcher".into())));
    }

    #[test]
    fn empty_command_rejected() {
        let mut config = RawConfig::empty();
        config.service.home_command = Some(vec![]);

        let errors = validate_config(&config);
        assert_eq!(
            errors,
            vec![ValidationError::EmptyCommand("service.home_command")]
        );
    }
}
