//! Mock host collaborators for testing

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_api::WakePayload;
use warden_util::AppId;

use crate::{
    ForegroundHost, ForegroundSubscription, HostCapabilities, HostError, HostResult,
    HostSignal, LockScreenPresenter, Scheduler, SignalSender, UserNotifier,
};

/// Mock foreground host for unit/integration testing
pub struct MockHost {
    capabilities: HostCapabilities,
    foreground: Arc<Mutex<Option<AppId>>>,
    senders: Arc<Mutex<Vec<SignalSender>>>,
    terminated: Arc<Mutex<Vec<AppId>>>,
    home_requests: AtomicUsize,
    subscriptions: AtomicUsize,

    /// Whether the monitoring grant is present
    pub grant: Arc<AtomicBool>,

    /// Configure foreground queries to fail
    pub fail_query: Arc<Mutex<bool>>,

    /// Configure terminate to fail
    pub fail_terminate: Arc<Mutex<bool>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            capabilities: HostCapabilities::full(),
            foreground: Arc::new(Mutex::new(None)),
            senders: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(Mutex::new(Vec::new())),
            home_requests: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            grant: Arc::new(AtomicBool::new(true)),
            fail_query: Arc::new(Mutex::new(false)),
            fail_terminate: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_capabilities(mut self, caps: HostCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Set what the poll channel reports
    pub fn set_foreground(&self, app: Option<AppId>) {
        *self.foreground.lock().unwrap() = app;
    }

    /// Push a signal to every live subscription; returns how many received it
    pub fn emit(&self, signal: HostSignal) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|s| !s.is_closed());
        senders.iter().filter(|s| s.send(signal.clone())).count()
    }

    /// Simulate the user switching apps: updates the poll answer and pushes an event
    pub fn switch_to(&self, app: AppId, at: DateTime<Local>) -> usize {
        self.set_foreground(Some(app.clone()));
        self.emit(HostSignal::ForegroundChanged { app, at })
    }

    pub fn set_grant(&self, granted: bool) {
        self.grant.store(granted, Ordering::SeqCst);
    }

    pub fn terminated_apps(&self) -> Vec<AppId> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn home_requests(&self) -> usize {
        self.home_requests.load(Ordering::SeqCst)
    }

    /// Number of subscriptions opened so far
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Number of subscriptions still open
    pub fn live_subscriptions(&self) -> usize {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|s| !s.is_closed());
        senders.len()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ForegroundHost for MockHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    fn subscribe(&self) -> HostResult<ForegroundSubscription> {
        if !self.capabilities.can_observe_foreground_events {
            return Ok(ForegroundSubscription::idle());
        }

        let (sender, subscription) = ForegroundSubscription::channel();
        self.senders.lock().unwrap().push(sender);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(subscription)
    }

    async fn query_foreground_app(&self, _now: DateTime<Local>) -> HostResult<Option<AppId>> {
        if *self.fail_query.lock().unwrap() {
            return Err(HostError::QueryFailed("Mock query failure".into()));
        }
        Ok(self.foreground.lock().unwrap().clone())
    }

    async fn terminate(&self, app: &AppId) -> HostResult<()> {
        if *self.fail_terminate.lock().unwrap() {
            return Err(HostError::TerminateFailed("Mock terminate failure".into()));
        }

        self.terminated.lock().unwrap().push(app.clone());
        let mut foreground = self.foreground.lock().unwrap();
        if foreground.as_ref() == Some(app) {
            *foreground = None;
        }
        Ok(())
    }

    async fn go_to_home_surface(&self) -> HostResult<()> {
        self.home_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_monitoring_grant(&self) -> bool {
        self.grant.load(Ordering::SeqCst)
    }
}

/// Mock lock screen that records presentations
#[derive(Default)]
pub struct MockPresenter {
    showing: AtomicBool,
    presented: Mutex<Vec<(AppId, Duration, Duration)>>,
    dismissals: AtomicUsize,
}

impl MockPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> Vec<(AppId, Duration, Duration)> {
        self.presented.lock().unwrap().clone()
    }

    pub fn dismissals(&self) -> usize {
        self.dismissals.load(Ordering::SeqCst)
    }

    /// Simulate the user closing the lock screen
    pub fn set_showing(&self, showing: bool) {
        self.showing.store(showing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LockScreenPresenter for MockPresenter {
    async fn present(&self, app: &AppId, used: Duration, limit: Duration) -> HostResult<()> {
        self.presented.lock().unwrap().push((app.clone(), used, limit));
        self.showing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn dismiss(&self) -> HostResult<()> {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
        self.showing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }
}

/// Mock scheduler that records deferred wakes instead of delivering them
#[derive(Default)]
pub struct MockScheduler {
    wakes: Mutex<Vec<(Duration, WakePayload)>>,
    restarts: AtomicUsize,

    /// Configure scheduling to fail
    pub fail_schedule: Arc<Mutex<bool>>,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wakes(&self) -> Vec<(Duration, WakePayload)> {
        self.wakes.lock().unwrap().clone()
    }

    pub fn wakes_for(&self, payload: WakePayload) -> usize {
        self.wakes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| *p == payload)
            .count()
    }

    pub fn service_restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn schedule_deferred_wake(
        &self,
        delay: Duration,
        payload: WakePayload,
    ) -> HostResult<()> {
        if *self.fail_schedule.lock().unwrap() {
            return Err(HostError::ScheduleFailed("Mock schedule failure".into()));
        }
        self.wakes.lock().unwrap().push((delay, payload));
        Ok(())
    }

    async fn restart_service(&self) -> HostResult<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock notifier that counts notices
#[derive(Default)]
pub struct MockNotifier {
    grant_prompts: AtomicUsize,
    stopped_notices: AtomicUsize,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_prompts(&self) -> usize {
        self.grant_prompts.load(Ordering::SeqCst)
    }

    pub fn stopped_notices(&self) -> usize {
        self.stopped_notices.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserNotifier for MockNotifier {
    async fn prompt_for_grant(&self) -> HostResult<()> {
        self.grant_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_enforcement_stopped(&self) -> HostResult<()> {
        self.stopped_notices.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
