//! Durable deferred wakes through systemd user timers
//!
//! Each wake becomes a transient timer unit that runs `wardend wake <payload>`
//! once, independent of whether the daemon is still alive.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use warden_api::WakePayload;
use warden_host_api::{HostError, HostResult, Scheduler};

use crate::process::run_command;

/// Unit name of the daemon under the user service manager
pub const SERVICE_UNIT: &str = "wardend.service";

/// Schedules wakes with `systemd-run --user --on-active`
pub struct SystemdScheduler {
    exe: PathBuf,
    /// Global arguments forwarded to the woken process (`--config`, `--data-dir`)
    forward_args: Vec<String>,
    service_unit: String,
}

impl SystemdScheduler {
    pub fn new(exe: PathBuf, forward_args: Vec<String>) -> Self {
        Self {
            exe,
            forward_args,
            service_unit: SERVICE_UNIT.to_string(),
        }
    }

    /// Scheduler that re-executes the running binary
    pub fn for_current_exe(forward_args: Vec<String>) -> HostResult<Self> {
        Ok(Self::new(std::env::current_exe()?, forward_args))
    }

    pub fn with_service_unit(mut self, unit: impl Into<String>) -> Self {
        self.service_unit = unit.into();
        self
    }

    /// Full `systemd-run` invocation for one wake
    pub fn wake_command(&self, delay: Duration, payload: WakePayload) -> Vec<String> {
        // systemd timers have whole-second granularity here
        let secs = delay.as_secs().max(1);
        let unit = format!("wardend-wake-{}", uuid::Uuid::new_v4().simple());

        let mut argv = vec![
            "systemd-run".to_string(),
            "--user".to_string(),
            "--collect".to_string(),
            "--quiet".to_string(),
            format!("--on-active={}s", secs),
            format!("--unit={}", unit),
            self.exe.display().to_string(),
        ];
        argv.extend(self.forward_args.iter().cloned());
        argv.push("wake".to_string());
        argv.push(payload.to_string());
        argv
    }

    pub fn restart_command(&self) -> Vec<String> {
        ["systemctl", "--user", "restart", self.service_unit.as_str()]
            .map(String::from)
            .to_vec()
    }
}

#[async_trait]
impl Scheduler for SystemdScheduler {
    async fn schedule_deferred_wake(
        &self,
        delay: Duration,
        payload: WakePayload,
    ) -> HostResult<()> {
        let argv = self.wake_command(delay, payload);
        run_command(&argv)
            .await
            .map_err(|e| HostError::ScheduleFailed(e.to_string()))?;

        info!(delay_secs = delay.as_secs(), payload = %payload, "Scheduled deferred wake");
        Ok(())
    }

    async fn restart_service(&self) -> HostResult<()> {
        if let Err(e) = run_command(&self.restart_command()).await {
            warn!(unit = %self.service_unit, error = %e, "Service restart failed");
            return Err(HostError::ScheduleFailed(e.to_string()));
        }

        info!(unit = %self.service_unit, "Requested service restart");
        Ok(())
    }
}
