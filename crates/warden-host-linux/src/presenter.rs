//! Lock screen shown by an external command
//!
//! The command receives the app id, minutes used and the limit in minutes as
//! trailing arguments. It counts as showing until it exits or is dismissed.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use warden_host_api::{HostError, HostResult, LockScreenPresenter};
use warden_util::AppId;

pub struct CommandPresenter {
    lock_command: Option<Vec<String>>,
    showing: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
}

impl CommandPresenter {
    /// Without a lock command a critical notification stands in for the lock screen
    pub fn new(lock_command: Option<Vec<String>>) -> Self {
        Self {
            lock_command,
            showing: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
        }
    }

    pub fn lock_args(app: &AppId, used: Duration, limit: Duration) -> Vec<String> {
        vec![
            app.to_string(),
            (used.as_secs() / 60).to_string(),
            (limit.as_secs() / 60).to_string(),
        ]
    }

    async fn notify_fallback(&self, app: &AppId, used: Duration, limit: Duration) -> HostResult<()> {
        let body = format!(
            "{} has used {} of its {} daily limit",
            app,
            warden_util::format_duration(used),
            warden_util::format_duration(limit)
        );
        crate::process::run_command(&[
            "notify-send".to_string(),
            "--app-name=wardend".to_string(),
            "--urgency=critical".to_string(),
            "Time's up".to_string(),
            body,
        ])
        .await
        .map(|_| ())
        .map_err(|e| HostError::PresentationFailed(e.to_string()))
    }
}

#[async_trait]
impl LockScreenPresenter for CommandPresenter {
    async fn present(&self, app: &AppId, used: Duration, limit: Duration) -> HostResult<()> {
        let Some((program, args)) = self.lock_command.as_ref().and_then(|c| c.split_first())
        else {
            return self.notify_fallback(app, used, limit).await;
        };

        let mut guard = self.child.lock().await;
        if let Some(existing) = guard.as_mut()
            && matches!(existing.try_wait(), Ok(None))
        {
            debug!(app = %app, "Lock screen already running");
            return Ok(());
        }

        let child = Command::new(program)
            .args(args)
            .args(Self::lock_args(app, used, limit))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::PresentationFailed(format!("{}: {}", program, e)))?;

        let pid = child.id();
        *guard = Some(child);
        self.showing.store(true, Ordering::SeqCst);
        info!(app = %app, pid = ?pid, "Lock screen presented");

        let showing = self.showing.clone();
        let slot = self.child.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let mut guard = slot.lock().await;
                let exited = match guard.as_mut() {
                    Some(child) if child.id() == pid => !matches!(child.try_wait(), Ok(None)),
                    _ => break,
                };
                if exited {
                    *guard = None;
                    showing.store(false, Ordering::SeqCst);
                    debug!("Lock screen exited");
                    break;
                }
            }
        });

        Ok(())
    }

    async fn dismiss(&self) -> HostResult<()> {
        let child = self.child.lock().await.take();
        self.showing.store(false, Ordering::SeqCst);

        if let Some(mut child) = child
            && let Err(e) = child.kill().await
        {
            warn!(error = %e, "Failed to close lock screen");
        }
        Ok(())
    }

    fn is_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }
}
