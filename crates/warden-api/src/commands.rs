//! Command types for the configuration surface

use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_util::AppId;

use crate::{AppStatus, API_VERSION};

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(payload: ResponsePayload) -> Self {
        Self {
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self {
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, ResponseResult::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    StoreError,
    InternalError,
}

/// Operations the core exposes to the configuration collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Configure a daily limit; zero minutes means unlimited
    SetLimit { app_id: AppId, minutes: u64 },

    /// Remove a daily limit (always unlocks the app)
    RemoveLimit { app_id: AppId },

    /// Zero every usage counter and re-evaluate locks
    ResetAllUsage,

    /// Manual override: unlock now without touching usage
    Unlock { app_id: AppId },

    GetUsage { app_id: AppId },

    GetLimit { app_id: AppId },

    IsLocked { app_id: AppId },

    /// Budget status of one app, or of every known app
    Status { app_id: Option<AppId> },

    /// Enable or disable automatic restart of the enforcement loop
    SetAutoRestart { enabled: bool },
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    LimitSet { app_id: AppId, minutes: u64 },
    LimitRemoved { app_id: AppId },
    UsageReset,
    Unlocked { app_id: AppId },
    Usage { app_id: AppId, used: Duration },
    /// Zero means unlimited
    Limit { app_id: AppId, limit: Duration },
    Locked { app_id: AppId, locked: bool },
    Status { apps: Vec<AppStatus> },
    AutoRestartSet { enabled: bool },
}
