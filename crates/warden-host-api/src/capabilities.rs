//! Host capabilities model

use serde::{Deserialize, Serialize};

/// Describes what a host adapter can do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// Pushes foreground changes as they happen
    pub can_observe_foreground_events: bool,

    /// Answers "what is in the foreground right now"
    pub can_query_foreground: bool,

    /// Reports screen on/off transitions
    pub can_observe_screen_power: bool,

    /// Can terminate an app by identity
    pub can_terminate: bool,

    /// Can return the device to its home/idle surface
    pub can_go_home: bool,

    /// Can schedule wakes that survive process death
    pub can_schedule_durable_wake: bool,
}

impl HostCapabilities {
    /// Polling-only host: no push channel, no screen power, no durable wakes
    pub fn minimal() -> Self {
        Self {
            can_observe_foreground_events: false,
            can_query_foreground: true,
            can_observe_screen_power: false,
            can_terminate: true,
            can_go_home: false,
            can_schedule_durable_wake: false,
        }
    }

    /// Linux desktop running sway under a systemd user session
    pub fn linux_sway() -> Self {
        Self {
            can_observe_foreground_events: true,
            can_query_foreground: true,
            can_observe_screen_power: false,
            can_terminate: true,
            can_go_home: true,
            can_schedule_durable_wake: true,
        }
    }

    /// Everything available (used by the mock host)
    pub fn full() -> Self {
        Self {
            can_observe_foreground_events: true,
            can_query_foreground: true,
            can_observe_screen_power: true,
            can_terminate: true,
            can_go_home: true,
            can_schedule_durable_wake: true,
        }
    }

    /// Whether the enforcement loop can observe anything at all
    pub fn can_observe(&self) -> bool {
        self.can_observe_foreground_events || self.can_query_foreground
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::minimal()
    }
}
