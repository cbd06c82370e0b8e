//! Sway foreground host

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use warden_host_api::{
    ForegroundHost, ForegroundSubscription, HostCapabilities, HostError, HostResult, HostSignal,
};
use warden_util::AppId;

use crate::process::{pids_by_comm, run_command, terminate_pids};
use crate::sway::{self, SwayWindow};

/// Environment variable sway exports to clients of its IPC socket
pub const SWAYSOCK_ENV: &str = "SWAYSOCK";

const SWAYMSG: &str = "swaymsg";

/// Last window seen in the foreground
type LastSeen = Arc<Mutex<Option<(AppId, DateTime<Local>)>>>;

/// Foreground host backed by the sway compositor's IPC
pub struct SwayHost {
    capabilities: HostCapabilities,
    home_command: Option<Vec<String>>,
    lookback: Duration,
    proc_root: PathBuf,
    last_seen: LastSeen,
}

impl SwayHost {
    pub fn new(home_command: Option<Vec<String>>, lookback: Duration) -> Self {
        let mut capabilities = HostCapabilities::linux_sway();
        capabilities.can_go_home = home_command.is_some();

        Self {
            capabilities,
            home_command,
            lookback,
            proc_root: PathBuf::from("/proc"),
            last_seen: Arc::new(Mutex::new(None)),
        }
    }

    async fn get_tree(&self) -> HostResult<Value> {
        let argv = [SWAYMSG, "-r", "-t", "get_tree"].map(String::from);
        let output = run_command(&argv)
            .await
            .map_err(|e| HostError::QueryFailed(e.to_string()))?;

        serde_json::from_slice(&output.stdout)
            .map_err(|e| HostError::QueryFailed(format!("Invalid sway tree: {}", e)))
    }

    fn remember(last_seen: &LastSeen, window: &SwayWindow, at: DateTime<Local>) {
        if let Ok(mut last) = last_seen.lock() {
            *last = Some((window.app.clone(), at));
        }
    }

    /// Last seen app, if it was seen within the lookback window
    fn recent(&self, now: DateTime<Local>) -> Option<AppId> {
        let last = self.last_seen.lock().ok()?.clone()?;
        (warden_util::elapsed_between(last.1, now) <= self.lookback).then_some(last.0)
    }
}

#[async_trait]
impl ForegroundHost for SwayHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    fn subscribe(&self) -> HostResult<ForegroundSubscription> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::Internal(e.to_string()))?;

        let mut child = Command::new(SWAYMSG)
            .args(["-m", "-r", "-t", "subscribe", r#"["window"]"#])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Internal("swaymsg stdout not captured".into()))?;

        let (sender, subscription) = ForegroundSubscription::channel();
        let last_seen = self.last_seen.clone();

        runtime.spawn(async move {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                tokio::select! {
                    _ = sender.closed() => {
                        debug!("Sway subscription cancelled");
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let Some(window) = sway::parse_window_event(&line) else {
                                continue;
                            };
                            let at = warden_util::now();
                            Self::remember(&last_seen, &window, at);
                            if !sender.send(HostSignal::ForegroundChanged { app: window.app, at }) {
                                break;
                            }
                        }
                        Ok(None) => {
                            warn!("swaymsg subscription ended");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read sway events");
                            break;
                        }
                    }
                }
            }

            let _ = child.kill().await;
        });

        info!("Subscribed to sway window events");
        Ok(subscription)
    }

    async fn query_foreground_app(&self, now: DateTime<Local>) -> HostResult<Option<AppId>> {
        match self.get_tree().await {
            Ok(tree) => {
                let focused = sway::focused_window(&tree);
                if let Some(window) = &focused {
                    Self::remember(&self.last_seen, window, now);
                }
                Ok(focused.map(|w| w.app))
            }
            Err(e) => match self.recent(now) {
                Some(app) => {
                    debug!(error = %e, app = %app, "Sway query failed, using recent foreground");
                    Ok(Some(app))
                }
                None => Err(e),
            },
        }
    }

    async fn terminate(&self, app: &AppId) -> HostResult<()> {
        let mut pids = match self.get_tree().await {
            Ok(tree) => sway::pids_for_app(&tree, app),
            Err(e) => {
                warn!(error = %e, "Could not read sway tree, falling back to /proc");
                Vec::new()
            }
        };

        if pids.is_empty() {
            pids = pids_by_comm(&self.proc_root, app.as_str());
        }

        if pids.is_empty() {
            debug!(app = %app, "No process found to terminate");
            return Ok(());
        }

        let signalled = terminate_pids(&pids)?;
        info!(app = %app, pids = ?pids, signalled, "Terminated app");
        Ok(())
    }

    async fn go_to_home_surface(&self) -> HostResult<()> {
        let Some(argv) = &self.home_command else {
            return Err(HostError::Unsupported);
        };

        run_command(argv)
            .await
            .map(|_| ())
            .map_err(|e| HostError::NavigationFailed(e.to_string()))
    }

    fn has_monitoring_grant(&self) -> bool {
        std::env::var_os(SWAYSOCK_ENV)
            .map(|path| Path::new(&path).exists())
            .unwrap_or(false)
    }
}
