//! Enforcement and watchdog loops over the host collaborators

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_api::{EventPayload, LoopName, WakePayload};
use warden_config::Settings;
use warden_host_api::{
    ForegroundHost, ForegroundSubscription, LockScreenPresenter, Scheduler, UserNotifier,
};
use warden_store::{AuditEventType, Store};

use crate::{
    CoreEvent, EnforcementEngine, EventBus, LockStateStore, LoopHandle, WatchdogAction,
    WatchdogSupervisor,
};

/// Everything the loops need from the host
#[derive(Clone)]
pub struct HostCollaborators {
    pub host: Arc<dyn ForegroundHost>,
    pub presenter: Arc<dyn LockScreenPresenter>,
    pub scheduler: Arc<dyn Scheduler>,
    pub notifier: Arc<dyn UserNotifier>,
}

#[derive(Clone)]
struct LoopContext {
    settings: Settings,
    store: Arc<dyn Store>,
    bus: EventBus,
    collaborators: HostCollaborators,
    /// Set while a restart is replacing the running enforcement loop
    replacing: Arc<AtomicBool>,
}

/// Owns the enforcement and watchdog loops of one process
pub struct EnforcementService {
    ctx: LoopContext,
    enforcement: Mutex<LoopHandle>,
    watchdog: Mutex<LoopHandle>,
}

impl EnforcementService {
    pub fn new(
        settings: Settings,
        store: Arc<dyn Store>,
        bus: EventBus,
        collaborators: HostCollaborators,
    ) -> Self {
        Self {
            ctx: LoopContext {
                settings,
                store,
                bus,
                collaborators,
                replacing: Arc::new(AtomicBool::new(false)),
            },
            enforcement: Mutex::new(LoopHandle::new(LoopName::Enforcement)),
            watchdog: Mutex::new(LoopHandle::new(LoopName::Watchdog)),
        }
    }

    pub fn state(&self) -> LockStateStore {
        LockStateStore::new(self.ctx.store.clone())
    }

    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    pub fn supervisor(&self) -> WatchdogSupervisor {
        WatchdogSupervisor::new(
            self.state(),
            self.ctx.settings.watchdog.clone(),
            self.ctx.bus.clone(),
        )
    }

    /// A fresh engine over the shared store, for command handling
    pub fn engine(&self) -> EnforcementEngine {
        EnforcementEngine::new(&self.ctx.settings, self.ctx.store.clone(), self.ctx.bus.clone())
    }

    /// Start both loops and make sure an out-of-process check is pending
    pub async fn start(self: &Arc<Self>) {
        self.state().audit(AuditEventType::ServiceStarted);

        let mut supervisor = self.supervisor();
        if supervisor.auto_restart_enabled() {
            match supervisor.guaranteed_check(warden_util::now()) {
                Ok(Some(action)) => perform(&self.ctx.collaborators, action).await,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to schedule guaranteed check"),
            }
        }

        self.start_enforcement().await;
        self.start_watchdog().await;
    }

    /// Stop both loops
    pub async fn shutdown(&self) {
        info!("Shutting down loops");
        self.watchdog.lock().await.stop().await;
        self.enforcement.lock().await.stop().await;

        self.ctx.bus.publish(EventPayload::Shutdown);
        self.state().audit(AuditEventType::ServiceStopped);
    }

    // Enforcement loop

    /// Start the enforcement loop; a no-op if it is running, dormant without the grant
    pub async fn start_enforcement(&self) -> bool {
        if !self.ctx.collaborators.host.has_monitoring_grant() {
            warn!("Monitoring grant missing, enforcement loop not started");
            return false;
        }

        let ctx = self.ctx.clone();
        self.enforcement
            .lock()
            .await
            .start(move |cancel| run_enforcement(ctx, cancel))
    }

    /// Cancel the running enforcement loop, wait for it, and start a new one
    ///
    /// The old loop's teardown does not schedule its own retry wake.
    pub async fn restart_enforcement(&self) -> bool {
        let mut handle = self.enforcement.lock().await;
        self.ctx.replacing.store(true, Ordering::SeqCst);
        handle.stop().await;
        self.ctx.replacing.store(false, Ordering::SeqCst);

        if !self.ctx.collaborators.host.has_monitoring_grant() {
            warn!("Monitoring grant missing, enforcement loop not restarted");
            return false;
        }

        let ctx = self.ctx.clone();
        handle.start(move |cancel| run_enforcement(ctx, cancel))
    }

    pub async fn stop_enforcement(&self) {
        self.enforcement.lock().await.stop().await;
    }

    pub async fn is_enforcement_running(&self) -> bool {
        self.enforcement.lock().await.is_running()
    }

    pub async fn enforcement_starts(&self) -> u64 {
        self.enforcement.lock().await.starts()
    }

    // Watchdog loop

    pub async fn start_watchdog(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.watchdog
            .lock()
            .await
            .start(move |cancel| async move { this.run_watchdog(cancel).await })
    }

    async fn run_watchdog(&self, cancel: CancellationToken) {
        let settings = &self.ctx.settings.watchdog;
        let mut supervisor = self.supervisor();

        if let Err(e) = supervisor.beat(LoopName::Watchdog, warden_util::now()) {
            warn!(error = %e, "Failed to write watchdog heartbeat");
        }

        // The first check waits a full interval so a just-started loop can beat
        let start = Instant::now();
        let mut check = interval_at(start + settings.check_interval, settings.check_interval);
        let mut heartbeat =
            interval_at(start + settings.heartbeat_interval, settings.heartbeat_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    if let Err(e) = supervisor.beat(LoopName::Watchdog, warden_util::now()) {
                        warn!(error = %e, "Failed to write watchdog heartbeat");
                    }
                }
                _ = check.tick() => {
                    self.watchdog_check(&mut supervisor).await;
                }
            }
        }

        if let Err(e) = supervisor.mark_inactive(LoopName::Watchdog, warden_util::now()) {
            warn!(error = %e, "Failed to mark watchdog inactive");
        }
    }

    /// One in-process supervision cycle of the enforcement loop
    pub async fn watchdog_check(&self, supervisor: &mut WatchdogSupervisor) {
        let now = warden_util::now();
        let grant = self.ctx.collaborators.host.has_monitoring_grant();

        let actions = match supervisor.check(&[LoopName::Enforcement], now, grant) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(error = %e, "Watchdog check failed");
                return;
            }
        };

        for action in actions {
            match action {
                WatchdogAction::RestartLoop(LoopName::Enforcement) => {
                    self.restart_enforcement().await;
                }
                WatchdogAction::RestartLoop(LoopName::Watchdog) => {
                    debug!("Watchdog cannot restart itself in-process");
                }
                other => perform(&self.ctx.collaborators, other).await,
            }
        }
    }

    /// Handle a durable deferred wake in a fresh process
    ///
    /// Nothing runs in this process; a stale loop is recovered by restarting
    /// the whole service.
    pub async fn handle_wake(&self, payload: WakePayload) {
        let now = warden_util::now();
        let grant = self.ctx.collaborators.host.has_monitoring_grant();
        let mut supervisor = self.supervisor();

        let loops: &[LoopName] = match payload {
            WakePayload::RestartLoop => &[LoopName::Enforcement],
            WakePayload::WatchdogCheck => &LoopName::ALL,
        };

        let mut actions = match supervisor.check(loops, now, grant) {
            Ok(actions) => actions,
            Err(e) => {
                error!(error = %e, payload = %payload, "Wake check failed");
                return;
            }
        };

        match payload {
            // A retry wake does not chain further retries
            WakePayload::RestartLoop => actions.retain(|a| {
                !matches!(a, WatchdogAction::ScheduleDeferredWake { payload: WakePayload::RestartLoop, .. })
            }),
            WakePayload::WatchdogCheck => {
                if supervisor.auto_restart_enabled() {
                    match supervisor.reschedule_guaranteed_check(now) {
                        Ok(action) => actions.push(action),
                        Err(e) => warn!(error = %e, "Failed to reschedule guaranteed check"),
                    }
                }
            }
        }

        let mut restarted = false;
        for action in actions {
            match action {
                WatchdogAction::RestartLoop(loop_name) => {
                    if restarted {
                        continue;
                    }
                    restarted = true;
                    info!(loop_name = %loop_name, "Restarting service from wake");
                    if let Err(e) = self.ctx.collaborators.scheduler.restart_service().await {
                        warn!(error = %e, "Service restart failed");
                    }
                }
                other => perform(&self.ctx.collaborators, other).await,
            }
        }
    }
}

/// Carry out a supervisor action that needs only the host
async fn perform(collaborators: &HostCollaborators, action: WatchdogAction) {
    let result = match action {
        WatchdogAction::ScheduleDeferredWake { delay, payload } => {
            debug!(delay_secs = delay.as_secs(), payload = %payload, "Scheduling deferred wake");
            collaborators
                .scheduler
                .schedule_deferred_wake(delay, payload)
                .await
        }
        WatchdogAction::PromptForGrant => collaborators.notifier.prompt_for_grant().await,
        WatchdogAction::NotifyLoopDead => collaborators.notifier.notify_enforcement_stopped().await,
        WatchdogAction::RestartLoop(loop_name) => {
            debug!(loop_name = %loop_name, "Restart must be handled by the service");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(action = ?action, error = %e, "Watchdog action failed");
    }
}

/// Perform the host-side effects of engine events
pub async fn apply_effects(collaborators: &HostCollaborators, events: Vec<CoreEvent>) {
    for event in events {
        match event {
            CoreEvent::Locked { app, used, limit } => {
                go_home_and_terminate(collaborators, &app).await;
                if let Err(e) = collaborators.presenter.present(&app, used, limit).await {
                    warn!(app = %app, error = %e, "Failed to present lock screen");
                }
            }
            CoreEvent::Blocked { app, used, limit } => {
                go_home_and_terminate(collaborators, &app).await;
                if collaborators.presenter.is_showing() {
                    debug!(app = %app, "Lock screen already showing");
                } else if let Err(e) = collaborators.presenter.present(&app, used, limit).await {
                    warn!(app = %app, error = %e, "Failed to present lock screen");
                }
            }
            CoreEvent::Unlocked { app } => {
                if collaborators.presenter.is_showing()
                    && let Err(e) = collaborators.presenter.dismiss().await
                {
                    warn!(app = %app, error = %e, "Failed to dismiss lock screen");
                }
            }
        }
    }
}

async fn go_home_and_terminate(collaborators: &HostCollaborators, app: &warden_util::AppId) {
    if let Err(e) = collaborators.host.go_to_home_surface().await {
        warn!(app = %app, error = %e, "Failed to return to home surface");
    }
    if let Err(e) = collaborators.host.terminate(app).await {
        warn!(app = %app, error = %e, "Failed to terminate app");
    }
}

async fn run_enforcement(ctx: LoopContext, cancel: CancellationToken) {
    let tracking = &ctx.settings.tracking;
    let host = ctx.collaborators.host.clone();

    let mut engine = EnforcementEngine::new(&ctx.settings, ctx.store.clone(), ctx.bus.clone());
    let mut supervisor = WatchdogSupervisor::new(
        engine.state().clone(),
        ctx.settings.watchdog.clone(),
        ctx.bus.clone(),
    );

    if let Err(e) = supervisor.beat(LoopName::Enforcement, warden_util::now()) {
        warn!(error = %e, "Failed to write enforcement heartbeat");
    }

    let mut subscription = match host.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Foreground push channel unavailable, polling only");
            ForegroundSubscription::idle()
        }
    };
    let mut push_open = true;

    let start = Instant::now();
    let mut poll = interval(tracking.poll_interval);
    let mut flush = interval_at(start + tracking.flush_interval, tracking.flush_interval);
    let heartbeat_interval = ctx.settings.watchdog.heartbeat_interval;
    let mut heartbeat = interval_at(start + heartbeat_interval, heartbeat_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Enforcement loop running");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = subscription.recv(), if push_open => match signal {
                Some(signal) => {
                    let events = engine.observe_signal(&signal);
                    apply_effects(&ctx.collaborators, events).await;
                }
                None => {
                    warn!("Foreground push channel closed, polling only");
                    push_open = false;
                }
            },
            _ = poll.tick() => {
                let now = warden_util::now();
                match host.query_foreground_app(now).await {
                    Ok(app) => {
                        let events = engine.observe_poll(app.as_ref(), now);
                        apply_effects(&ctx.collaborators, events).await;
                    }
                    Err(e) => warn!(error = %e, "Foreground query failed"),
                }
            }
            _ = flush.tick() => {
                let events = engine.flush(warden_util::now());
                apply_effects(&ctx.collaborators, events).await;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = supervisor.beat(LoopName::Enforcement, warden_util::now()) {
                    warn!(error = %e, "Failed to write enforcement heartbeat");
                }
            }
        }
    }

    subscription.cancel();
    let now = warden_util::now();
    engine.close_all(now);

    let teardown = if ctx.replacing.load(Ordering::SeqCst) {
        supervisor
            .mark_inactive(LoopName::Enforcement, now)
            .map(|()| Vec::new())
    } else {
        supervisor.on_teardown(LoopName::Enforcement, now)
    };

    match teardown {
        Ok(actions) => {
            for action in actions {
                perform(&ctx.collaborators, action).await;
            }
        }
        Err(e) => warn!(error = %e, "Failed to record enforcement teardown"),
    }

    info!("Enforcement loop stopped");
}
