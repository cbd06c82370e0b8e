//! Integration tests for wardend
//!
//! These drive the engine and the service loops end to end against the mock
//! host collaborators and an in-memory store.

use chrono::{DateTime, Local, TimeZone};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use warden_api::{EventPayload, HeartbeatRecord, LoopName, WakePayload};
use warden_config::Settings;
use warden_core::{
    CoreEvent, EnforcementEngine, EnforcementService, EventBus, HostCollaborators,
    LockStateStore, apply_effects,
};
use warden_host_api::{HostSignal, MockHost, MockNotifier, MockPresenter, MockScheduler};
use warden_store::{SqliteStore, Store};
use warden_util::AppId;

struct Harness {
    host: Arc<MockHost>,
    presenter: Arc<MockPresenter>,
    scheduler: Arc<MockScheduler>,
    notifier: Arc<MockNotifier>,
    store: Arc<dyn Store>,
    bus: EventBus,
    service: Arc<EnforcementService>,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        let host = Arc::new(MockHost::new());
        let presenter = Arc::new(MockPresenter::new());
        let scheduler = Arc::new(MockScheduler::new());
        let notifier = Arc::new(MockNotifier::new());
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let bus = EventBus::new();

        let service = Arc::new(EnforcementService::new(
            settings,
            store.clone(),
            bus.clone(),
            collaborators(&host, &presenter, &scheduler, &notifier),
        ));

        Self {
            host,
            presenter,
            scheduler,
            notifier,
            store,
            bus,
            service,
        }
    }

    fn state(&self) -> LockStateStore {
        LockStateStore::new(self.store.clone())
    }

    fn collaborators(&self) -> HostCollaborators {
        collaborators(&self.host, &self.presenter, &self.scheduler, &self.notifier)
    }
}

fn collaborators(
    host: &Arc<MockHost>,
    presenter: &Arc<MockPresenter>,
    scheduler: &Arc<MockScheduler>,
    notifier: &Arc<MockNotifier>,
) -> HostCollaborators {
    HostCollaborators {
        host: host.clone(),
        presenter: presenter.clone(),
        scheduler: scheduler.clone(),
        notifier: notifier.clone(),
    }
}

/// Timers short enough to observe the loops within a test
fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.tracking.poll_interval = Duration::from_millis(20);
    settings.tracking.flush_interval = Duration::from_millis(50);
    settings.tracking.noise_threshold = Duration::from_millis(5);
    settings.watchdog.heartbeat_interval = Duration::from_millis(50);
    settings.watchdog.check_interval = Duration::from_millis(100);
    settings.watchdog.retry_delay = Duration::from_secs(1);
    settings
}

fn t(secs: i64) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn enter(app: &str, at: DateTime<Local>) -> HostSignal {
    HostSignal::ForegroundChanged {
        app: AppId::new(app),
        at,
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

fn locked_events(rx: &mut tokio::sync::broadcast::Receiver<warden_api::Event>) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event.payload, EventPayload::Locked { .. }) {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn test_ten_minute_budget_locks_after_eleven_minutes() {
    let h = Harness::new(Settings::default());
    let mut rx = h.bus.subscribe();
    let mut engine = EnforcementEngine::new(&Settings::default(), h.store.clone(), h.bus.clone());
    let app = AppId::new("app.x");

    engine.set_limit(&app, 10).unwrap();

    // 9 minutes of dwell: still usable
    assert!(engine.observe_signal(&enter("app.x", t(0))).is_empty());
    assert!(engine.observe_signal(&enter("app.other", t(9 * 60))).is_empty());
    assert_eq!(engine.get_usage(&app).unwrap(), Duration::from_secs(9 * 60));
    assert!(!engine.is_locked(&app).unwrap());

    // 2 more minutes: over budget
    engine.observe_signal(&enter("app.x", t(10 * 60)));
    let events = engine.observe_signal(&enter("app.other", t(12 * 60)));
    assert!(matches!(events.as_slice(), [CoreEvent::Locked { app: a, .. }] if *a == app));
    assert!(engine.is_locked(&app).unwrap());

    apply_effects(&h.collaborators(), events).await;
    assert_eq!(h.host.terminated_apps(), vec![app.clone()]);
    assert_eq!(h.host.home_requests(), 1);
    assert_eq!(h.presenter.presented().len(), 1);

    // Coming back is blocked without another LOCKED event
    let events = engine.observe_signal(&enter("app.x", t(13 * 60)));
    assert!(matches!(events.as_slice(), [CoreEvent::Blocked { .. }]));
    apply_effects(&h.collaborators(), events).await;
    assert_eq!(h.host.terminated_apps().len(), 2);

    assert_eq!(locked_events(&mut rx), 1);
}

#[tokio::test]
async fn test_unlock_then_remove_limit() {
    let h = Harness::new(Settings::default());
    let mut engine = EnforcementEngine::new(&Settings::default(), h.store.clone(), h.bus.clone());
    let app = AppId::new("app.x");

    engine.set_limit(&app, 1).unwrap();
    engine.observe_signal(&enter("app.x", t(0)));
    engine.observe_signal(&enter("app.other", t(120)));
    assert!(engine.is_locked(&app).unwrap());

    let events = engine.unlock(&app).unwrap();
    assert!(matches!(events.as_slice(), [CoreEvent::Unlocked { .. }]));
    assert!(!engine.is_locked(&app).unwrap());
    assert_eq!(engine.get_usage(&app).unwrap(), Duration::from_secs(120));

    h.presenter.set_showing(true);
    apply_effects(&h.collaborators(), events).await;
    assert_eq!(h.presenter.dismissals(), 1);

    engine.remove_limit(&app).unwrap();
    assert!(!engine.is_locked(&app).unwrap());
    assert_eq!(engine.get_limit(&app).unwrap(), Duration::ZERO);
}

#[tokio::test]
async fn test_enforcement_loop_locks_running_app() {
    let h = Harness::new(fast_settings());
    let mut rx = h.bus.subscribe();
    let app = AppId::new("app.game");
    let state = h.state();

    state.set_usage_day(warden_util::day_of(warden_util::now())).unwrap();
    state
        .set_limits(&BTreeMap::from([(app.clone(), 1)]))
        .unwrap();
    // 50 ms short of the one-minute budget
    state
        .set_usage(&BTreeMap::from([(app.clone(), 59_950)]))
        .unwrap();

    assert!(h.service.start_enforcement().await);
    h.host.switch_to(app.clone(), warden_util::now());

    assert!(wait_for(|| h.host.terminated_apps().contains(&app)).await);
    assert!(wait_for(|| !h.presenter.presented().is_empty()).await);
    assert!(state.is_locked(&app).unwrap());
    assert_eq!(locked_events(&mut rx), 1);

    h.service.stop_enforcement().await;
}

#[tokio::test]
async fn test_loop_enforces_lock_set_by_another_engine() {
    let h = Harness::new(fast_settings());
    let app = AppId::new("app.video");
    let state = h.state();
    state.set_usage_day(warden_util::day_of(warden_util::now())).unwrap();

    assert!(h.service.start_enforcement().await);
    h.host.switch_to(app.clone(), warden_util::now());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.host.terminated_apps().is_empty());

    // A separate command process over the same store
    state
        .set_usage(&BTreeMap::from([(app.clone(), 5 * 60_000)]))
        .unwrap();
    let mut cli = EnforcementEngine::new(&fast_settings(), h.store.clone(), EventBus::new());
    cli.set_limit(&app, 1).unwrap();
    assert!(cli.is_locked(&app).unwrap());

    assert!(wait_for(|| h.host.terminated_apps().contains(&app)).await);

    h.service.stop_enforcement().await;
}

#[tokio::test]
async fn test_start_is_idempotent_and_restart_replaces_loop() {
    let h = Harness::new(fast_settings());

    assert!(h.service.start_enforcement().await);
    assert!(!h.service.start_enforcement().await);
    assert_eq!(h.service.enforcement_starts().await, 1);
    assert!(wait_for(|| h.host.subscription_count() == 1).await);

    assert!(h.service.restart_enforcement().await);
    assert_eq!(h.service.enforcement_starts().await, 2);
    assert!(h.service.is_enforcement_running().await);
    assert!(wait_for(|| h.host.subscription_count() == 2).await);
    // The old loop cancelled its subscription
    assert_eq!(h.host.live_subscriptions(), 1);

    h.service.stop_enforcement().await;
    assert!(!h.service.is_enforcement_running().await);
}

#[tokio::test]
async fn test_teardown_schedules_deferred_restart() {
    let h = Harness::new(fast_settings());

    h.service.start_enforcement().await;
    assert!(wait_for(|| h.host.subscription_count() == 1).await);
    h.service.stop_enforcement().await;

    assert_eq!(h.scheduler.wakes_for(WakePayload::RestartLoop), 1);
    let record = h.state().heartbeat(LoopName::Enforcement).unwrap().unwrap();
    assert!(!record.active);
}

#[tokio::test]
async fn test_teardown_without_auto_restart_schedules_nothing() {
    let h = Harness::new(fast_settings());
    h.state().set_auto_restart_enabled(false).unwrap();

    h.service.start_enforcement().await;
    assert!(wait_for(|| h.host.subscription_count() == 1).await);
    h.service.stop_enforcement().await;

    assert!(h.scheduler.wakes().is_empty());

    // A later guaranteed check surfaces the dead loop instead
    h.service.handle_wake(WakePayload::WatchdogCheck).await;
    assert_eq!(h.notifier.stopped_notices(), 1);
    assert_eq!(h.scheduler.service_restarts(), 0);
}

#[tokio::test]
async fn test_guaranteed_check_restarts_service_once() {
    let h = Harness::new(fast_settings());
    let state = h.state();
    let stale = warden_util::now() - chrono::Duration::minutes(10);
    for loop_name in LoopName::ALL {
        state
            .set_heartbeat(loop_name, &HeartbeatRecord::beat(stale))
            .unwrap();
    }

    h.service.handle_wake(WakePayload::WatchdogCheck).await;

    assert_eq!(h.scheduler.service_restarts(), 1);
    assert_eq!(h.scheduler.wakes_for(WakePayload::RestartLoop), 1);
    assert_eq!(h.scheduler.wakes_for(WakePayload::WatchdogCheck), 1);

    // The retry wake restarts again but does not chain another retry
    h.service.handle_wake(WakePayload::RestartLoop).await;
    assert_eq!(h.scheduler.service_restarts(), 2);
    assert_eq!(h.scheduler.wakes_for(WakePayload::RestartLoop), 1);
}

#[tokio::test]
async fn test_fresh_heartbeat_wake_is_quiet() {
    let h = Harness::new(fast_settings());
    let state = h.state();
    for loop_name in LoopName::ALL {
        state
            .set_heartbeat(loop_name, &HeartbeatRecord::beat(warden_util::now()))
            .unwrap();
    }

    h.service.handle_wake(WakePayload::RestartLoop).await;

    assert_eq!(h.scheduler.service_restarts(), 0);
    assert!(h.scheduler.wakes().is_empty());
}

#[tokio::test]
async fn test_missing_grant_keeps_loop_dormant() {
    let h = Harness::new(fast_settings());
    h.host.set_grant(false);

    h.service.start().await;
    assert!(!h.service.is_enforcement_running().await);
    assert_eq!(h.host.subscription_count(), 0);

    h.service.handle_wake(WakePayload::WatchdogCheck).await;
    h.service.handle_wake(WakePayload::WatchdogCheck).await;

    assert_eq!(h.notifier.grant_prompts(), 1);
    assert!(h.state().grant_needed().unwrap());
    assert_eq!(h.scheduler.service_restarts(), 0);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_start_schedules_one_guaranteed_check() {
    let h = Harness::new(fast_settings());

    h.service.start().await;
    assert!(h.service.is_enforcement_running().await);
    h.service.shutdown().await;

    // A second process start does not stack another chain
    let second = EnforcementService::new(
        fast_settings(),
        h.store.clone(),
        EventBus::new(),
        h.collaborators(),
    );
    let second = Arc::new(second);
    second.start().await;
    second.shutdown().await;

    assert_eq!(h.scheduler.wakes_for(WakePayload::WatchdogCheck), 1);
}

#[tokio::test]
async fn test_watchdog_loop_restarts_dead_enforcement() {
    let mut settings = fast_settings();
    settings.watchdog.stale_after = Duration::from_millis(150);
    let h = Harness::new(settings);

    h.service.start().await;
    assert!(wait_for(|| h.host.subscription_count() == 1).await);

    // Simulate a loop that died without tearing down cleanly
    h.service.stop_enforcement().await;
    assert!(!h.service.is_enforcement_running().await);

    assert!(
        wait_for(|| h.host.subscription_count() >= 2).await,
        "watchdog should have restarted the enforcement loop"
    );
    // One wake from the clean teardown, one retry from the check that restarted it
    assert!(wait_for(|| h.scheduler.wakes_for(WakePayload::RestartLoop) == 2).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.scheduler.wakes_for(WakePayload::RestartLoop), 2);
    assert_eq!(h.service.enforcement_starts().await, 2);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_restarting_hung_loop_schedules_one_retry() {
    let mut settings = fast_settings();
    settings.watchdog.heartbeat_interval = Duration::from_secs(3600);
    settings.watchdog.stale_after = Duration::from_secs(60);
    let h = Harness::new(settings);

    assert!(h.service.start_enforcement().await);
    assert!(wait_for(|| h.host.subscription_count() == 1).await);

    // Still running, but its last beat is five minutes old
    h.state()
        .set_heartbeat(
            LoopName::Enforcement,
            &HeartbeatRecord {
                last_beat: warden_util::now() - chrono::Duration::minutes(5),
                active: true,
            },
        )
        .unwrap();

    let mut supervisor = h.service.supervisor();
    h.service.watchdog_check(&mut supervisor).await;

    assert_eq!(h.scheduler.wakes_for(WakePayload::RestartLoop), 1);
    assert_eq!(h.service.enforcement_starts().await, 2);
    assert!(h.service.is_enforcement_running().await);
    assert_eq!(h.scheduler.service_restarts(), 0);

    h.service.stop_enforcement().await;
}

#[tokio::test]
async fn test_command_process_and_daemon_share_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = warden_util::db_path_in(dir.path());
    let app = AppId::new("app.x");

    let daemon_store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());
    let cli_store: Arc<dyn Store> = Arc::new(SqliteStore::open(&path).unwrap());

    let mut cli = EnforcementEngine::new(&Settings::default(), cli_store, EventBus::new());
    let (response, _) = cli.handle_command(
        warden_api::Command::SetLimit {
            app_id: app.clone(),
            minutes: 30,
        },
        warden_util::now(),
    );
    assert!(response.is_ok());

    let daemon = EnforcementEngine::new(&Settings::default(), daemon_store, EventBus::new());
    assert_eq!(daemon.get_limit(&app).unwrap(), Duration::from_secs(30 * 60));
    assert!(!daemon.is_locked(&app).unwrap());
}
