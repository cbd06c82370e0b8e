//! Host adapter traits

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::time::Duration;
use thiserror::Error;
use warden_api::WakePayload;
use warden_util::AppId;

use crate::{ForegroundSubscription, HostCapabilities};

/// Errors from host adapter operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Foreground query failed: {0}")]
    QueryFailed(String),

    #[error("Terminate failed: {0}")]
    TerminateFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Presentation failed: {0}")]
    PresentationFailed(String),

    #[error("Scheduling failed: {0}")]
    ScheduleFailed(String),

    #[error("Monitoring grant missing")]
    GrantMissing,

    #[error("Not supported by this host")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

impl From<HostError> for warden_util::WardenError {
    fn from(e: HostError) -> Self {
        warden_util::WardenError::host(e.to_string())
    }
}

/// Raw observations pushed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    /// The foreground application changed
    ForegroundChanged { app: AppId, at: DateTime<Local> },

    /// The display went dark; nothing is in the foreground any more
    ScreenOff { at: DateTime<Local> },

    /// The display came back on
    ScreenOn { at: DateTime<Local> },
}

impl HostSignal {
    pub fn at(&self) -> DateTime<Local> {
        match self {
            HostSignal::ForegroundChanged { at, .. }
            | HostSignal::ScreenOff { at }
            | HostSignal::ScreenOn { at } => *at,
        }
    }
}

/// Foreground observation and enforcement actions
#[async_trait]
pub trait ForegroundHost: Send + Sync {
    /// Get the capabilities of this host adapter
    fn capabilities(&self) -> &HostCapabilities;

    /// Open the push channel of foreground and screen-power changes
    ///
    /// May be called once per enforcement-loop start; cancelling the returned
    /// subscription stops the producer.
    fn subscribe(&self) -> HostResult<ForegroundSubscription>;

    /// Current foreground app, looking back over the host's short window
    async fn query_foreground_app(&self, now: DateTime<Local>) -> HostResult<Option<AppId>>;

    /// Terminate an application
    async fn terminate(&self, app: &AppId) -> HostResult<()>;

    /// Return the device to its home/idle surface
    async fn go_to_home_surface(&self) -> HostResult<()>;

    /// Whether the monitoring capability the enforcement loop needs is granted
    fn has_monitoring_grant(&self) -> bool;

    /// Optional: check if the host adapter is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}

/// The graphical lock screen (owned outside the core)
#[async_trait]
pub trait LockScreenPresenter: Send + Sync {
    async fn present(&self, app: &AppId, used: Duration, limit: Duration) -> HostResult<()>;

    async fn dismiss(&self) -> HostResult<()>;

    /// Externally owned "is currently showing" flag
    fn is_showing(&self) -> bool;
}

/// Durable scheduling that survives the death of this process
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Deliver `payload` after `delay`, at least once, even if this process dies
    async fn schedule_deferred_wake(&self, delay: Duration, payload: WakePayload)
        -> HostResult<()>;

    /// Restart the whole service; a no-op failure mode is acceptable when the
    /// service manager is unavailable
    async fn restart_service(&self) -> HostResult<()>;
}

/// User-facing notices (permission prompts, failure notifications)
#[async_trait]
pub trait UserNotifier: Send + Sync {
    /// Ask the user to grant the monitoring capability
    async fn prompt_for_grant(&self) -> HostResult<()>;

    /// Tell the user enforcement has stopped and will not recover by itself
    async fn notify_enforcement_stopped(&self) -> HostResult<()>;
}
