//! Event types published by the engine

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use warden_util::AppId;

use crate::{LoopName, ResetReason, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self::at(warden_util::now(), payload)
    }

    pub fn at(timestamp: DateTime<Local>, payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp,
            payload,
        }
    }
}

/// State-change notifications for the lock-screen presenter and other collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// App exhausted its budget and is now blocked
    Locked { app_id: AppId },

    /// App is usable again (limit removed, usage reset, or manual unlock)
    Unlocked { app_id: AppId },

    /// A daily limit was configured
    LimitSet { app_id: AppId, minutes: u64 },

    /// A daily limit was removed
    LimitRemoved { app_id: AppId },

    /// All usage counters were zeroed
    UsageReset { reason: ResetReason },

    /// The supervisor restarted a loop
    LoopRestarted { loop_name: LoopName },

    /// Monitoring grant is missing; enforcement is dormant
    GrantRequired,

    /// Service is shutting down
    Shutdown,
}

impl EventPayload {
    /// Stable broadcast name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Locked { .. } => "LOCKED",
            EventPayload::Unlocked { .. } => "UNLOCKED",
            EventPayload::LimitSet { .. } => "LIMIT_SET",
            EventPayload::LimitRemoved { .. } => "LIMIT_REMOVED",
            EventPayload::UsageReset { .. } => "USAGE_RESET",
            EventPayload::LoopRestarted { .. } => "LOOP_RESTARTED",
            EventPayload::GrantRequired => "GRANT_REQUIRED",
            EventPayload::Shutdown => "SHUTDOWN",
        }
    }

    /// App the event is about, if any
    pub fn app_id(&self) -> Option<&AppId> {
        match self {
            EventPayload::Locked { app_id }
            | EventPayload::Unlocked { app_id }
            | EventPayload::LimitSet { app_id, .. }
            | EventPayload::LimitRemoved { app_id } => Some(app_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::LimitSet {
            app_id: AppId::new("app.x"),
            minutes: 10,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"limit_set\""));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_version, API_VERSION);
        assert_eq!(parsed.payload, event.payload);
    }

    #[test]
    fn event_names() {
        let app = AppId::new("app.x");
        assert_eq!(EventPayload::Locked { app_id: app.clone() }.name(), "LOCKED");
        assert_eq!(EventPayload::Unlocked { app_id: app.clone() }.name(), "UNLOCKED");
        assert_eq!(
            EventPayload::LimitSet { app_id: app, minutes: 5 }.name(),
            "LIMIT_SET"
        );
        assert_eq!(EventPayload::GrantRequired.app_id(), None);
    }
}
