//! Desktop notices through `notify-send`

use async_trait::async_trait;
use tracing::warn;
use warden_host_api::{HostResult, UserNotifier};

use crate::process::run_command;

const APP_NAME: &str = "wardend";

/// Sends freedesktop notifications
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            program: "notify-send".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, urgency: &str, summary: &str, body: &str) -> Vec<String> {
        vec![
            self.program.clone(),
            format!("--app-name={}", APP_NAME),
            format!("--urgency={}", urgency),
            summary.to_string(),
            body.to_string(),
        ]
    }

    async fn send(&self, urgency: &str, summary: &str, body: &str) -> HostResult<()> {
        let argv = self.command(urgency, summary, body);
        if let Err(e) = run_command(&argv).await {
            warn!(error = %e, summary, "Failed to show notification");
            return Err(e);
        }
        Ok(())
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserNotifier for DesktopNotifier {
    async fn prompt_for_grant(&self) -> HostResult<()> {
        self.send(
            "normal",
            "Screen time tracking is paused",
            "wardend cannot reach the sway IPC socket. Start it from within your sway session.",
        )
        .await
    }

    async fn notify_enforcement_stopped(&self) -> HostResult<()> {
        self.send(
            "critical",
            "Screen time limits are not enforced",
            "wardend stopped and automatic restart is off. Run `wardend auto-restart on` or restart the service.",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_shape() {
        let argv = DesktopNotifier::new().command("low", "a", "b");
        assert_eq!(
            argv,
            vec!["notify-send", "--app-name=wardend", "--urgency=low", "a", "b"]
        );
    }

    #[tokio::test]
    async fn uses_configured_program() {
        assert!(DesktopNotifier::with_program("true").prompt_for_grant().await.is_ok());
        assert!(
            DesktopNotifier::with_program("false")
                .notify_enforcement_stopped()
                .await
                .is_err()
        );
    }
}
