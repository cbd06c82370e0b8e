//! Core events emitted by the engine

use std::time::Duration;
use warden_util::AppId;

/// Host-facing effects requested by the engine
///
/// Bus events are published by the engine itself; these tell the caller
/// which host actions to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// App just exhausted its budget: go home, terminate it, show the lock screen
    Locked {
        app: AppId,
        used: Duration,
        limit: Duration,
    },

    /// An already-locked app was found in the foreground again
    Blocked {
        app: AppId,
        used: Duration,
        limit: Duration,
    },

    /// App is usable again; dismiss the lock screen if it is up
    Unlocked { app: AppId },
}

impl CoreEvent {
    pub fn app(&self) -> &AppId {
        match self {
            CoreEvent::Locked { app, .. }
            | CoreEvent::Blocked { app, .. }
            | CoreEvent::Unlocked { app } => app,
        }
    }
}
