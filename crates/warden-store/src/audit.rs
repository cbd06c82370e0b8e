//! Audit event types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use warden_api::{LoopName, ResetReason};
use warden_util::AppId;

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// Usage crossed the limit
    AppLocked {
        app_id: AppId,
        used_secs: u64,
        limit_minutes: u64,
    },

    /// Lock lifted, either manually or because the budget changed
    AppUnlocked { app_id: AppId, manual: bool },

    LimitSet { app_id: AppId, minutes: u64 },

    LimitRemoved { app_id: AppId },

    UsageReset { reason: ResetReason },

    /// The supervisor restarted a loop
    LoopRestarted { loop_name: LoopName },

    /// The user was asked to grant the monitoring capability
    GrantPromptRaised,

    /// The user was told enforcement stopped
    EnforcementStopped,

    /// A persisted value could not be parsed and was treated as empty
    DataIntegrity { key: String, message: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(warden_util::now(), event)
    }

    pub fn at(timestamp: DateTime<Local>, event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
