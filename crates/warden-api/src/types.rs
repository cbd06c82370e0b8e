//! Shared types for the wardend API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use warden_util::AppId;

/// Direction of a foreground transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Enter,
    Exit,
}

/// A single change of foreground state for one app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundTransition {
    pub app: AppId,
    pub timestamp: DateTime<Local>,
    pub kind: TransitionKind,
}

impl ForegroundTransition {
    pub fn enter(app: AppId, timestamp: DateTime<Local>) -> Self {
        Self {
            app,
            timestamp,
            kind: TransitionKind::Enter,
        }
    }

    pub fn exit(app: AppId, timestamp: DateTime<Local>) -> Self {
        Self {
            app,
            timestamp,
            kind: TransitionKind::Exit,
        }
    }

    pub fn is_enter(&self) -> bool {
        self.kind == TransitionKind::Enter
    }
}

/// Channel a foreground observation arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    /// Pushed by the host when the foreground app changed
    Event,
    /// Synthesized from a periodic foreground query
    Poll,
}

/// Long-running loops that carry a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopName {
    Enforcement,
    Watchdog,
}

impl LoopName {
    pub const ALL: [LoopName; 2] = [LoopName::Enforcement, LoopName::Watchdog];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopName::Enforcement => "enforcement",
            LoopName::Watchdog => "watchdog",
        }
    }
}

impl fmt::Display for LoopName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness record written by the loop it describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub last_beat: DateTime<Local>,
    pub active: bool,
}

impl HeartbeatRecord {
    pub fn beat(now: DateTime<Local>) -> Self {
        Self {
            last_beat: now,
            active: true,
        }
    }

    /// Age of the last beat; zero if the beat is in the future
    pub fn age(&self, now: DateTime<Local>) -> Duration {
        warden_util::elapsed_between(self.last_beat, now)
    }

    pub fn is_stale(&self, now: DateTime<Local>, stale_after: Duration) -> bool {
        self.age(now) >= stale_after
    }
}

/// Supervisor view of a watched loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    /// No heartbeat observed yet
    Starting,
    /// Heartbeat is fresh
    Running,
    /// Heartbeat is older than the staleness threshold
    Stale,
    /// A restart has been requested and not yet confirmed by a fresh beat
    Restarting,
}

/// Work carried by a durable deferred wake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakePayload {
    /// Restart the enforcement loop if it is not alive
    RestartLoop,
    /// Run a full supervisor check of every loop
    WatchdogCheck,
}

impl WakePayload {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakePayload::RestartLoop => "restart-loop",
            WakePayload::WatchdogCheck => "watchdog-check",
        }
    }
}

impl fmt::Display for WakePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WakePayload {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart-loop" => Ok(WakePayload::RestartLoop),
            "watchdog-check" => Ok(WakePayload::WatchdogCheck),
            other => Err(format!("unknown wake payload: {}", other)),
        }
    }
}

/// Why usage was zeroed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// Explicit "reset all usage" command
    Manual,
    /// First activity on a new calendar day
    DailyRollover,
}

/// Budget status of a single app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub app_id: AppId,
    pub used: Duration,
    /// None means unlimited
    pub limit: Option<Duration>,
    pub locked: bool,
}

impl AppStatus {
    /// Budget left today, None when unlimited
    pub fn remaining(&self) -> Option<Duration> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}
