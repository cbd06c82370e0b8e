//! Start/stop handles for long-running loops

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_api::LoopName;

/// Owns at most one running instance of a loop
///
/// Starting a running loop is a no-op; restarting cancels the previous
/// instance and waits for it to finish before spawning the next, so two
/// instances never overlap.
#[derive(Debug)]
pub struct LoopHandle {
    name: LoopName,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    starts: u64,
}

impl LoopHandle {
    pub fn new(name: LoopName) -> Self {
        Self {
            name,
            cancel: None,
            task: None,
            starts: 0,
        }
    }

    pub fn name(&self) -> LoopName {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Number of instances spawned so far
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Spawn the loop unless it is already running; returns whether it spawned
    pub fn start<F, Fut>(&mut self, body: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            debug!(loop_name = %self.name, "Loop already running");
            return false;
        }

        let cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(body(cancel.clone())));
        self.cancel = Some(cancel);
        self.starts += 1;

        info!(loop_name = %self.name, starts = self.starts, "Loop started");
        true
    }

    /// Cancel the loop and wait for it to wind down
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(loop_name = %self.name, error = %e, "Loop task ended abnormally");
            }
            debug!(loop_name = %self.name, "Loop stopped");
        }
    }

    /// Stop any previous instance, then start a new one
    pub async fn restart<F, Fut>(&mut self, body: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop().await;
        self.start(body)
    }
}
