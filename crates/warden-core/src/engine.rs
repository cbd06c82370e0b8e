//! Enforcement engine
//!
//! Composes the signal source, accumulator and evaluator over the durable
//! state. The engine is synchronous: it decides, persists and publishes, and
//! hands host-facing effects back to the caller as [`CoreEvent`]s.

use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{
    AppStatus, Command, ErrorCode, ErrorInfo, EventPayload, ForegroundTransition, ResetReason,
    Response, ResponsePayload,
};
use warden_config::Settings;
use warden_host_api::HostSignal;
use warden_store::{AuditEventType, Store, StoreResult};
use warden_util::{AppId, Debouncer};

use crate::{
    CoreEvent, Evaluation, EventBus, ForegroundSignalSource, LimitEvaluator, LockStateStore,
    LockTransition, UsageAccumulator,
};

/// The enforcement engine
pub struct EnforcementEngine {
    state: LockStateStore,
    source: ForegroundSignalSource,
    accumulator: UsageAccumulator,
    evaluator: LimitEvaluator,
    bus: EventBus,
    block_debounce: Debouncer<AppId>,
}

impl EnforcementEngine {
    /// Create an engine over the durable store
    ///
    /// Nothing is carried over from a previous engine: open sessions start
    /// empty and every decision is rebuilt from the store.
    pub fn new(settings: &Settings, store: Arc<dyn Store>, bus: EventBus) -> Self {
        let state = LockStateStore::new(store);

        Self {
            source: ForegroundSignalSource::new(settings.tracking.system_apps.iter().cloned()),
            accumulator: UsageAccumulator::new(
                state.clone(),
                settings.tracking.noise_threshold,
                settings.tracking.flush_interval,
            ),
            evaluator: LimitEvaluator::new(state.clone()),
            block_debounce: Debouncer::new(settings.lock_screen.debounce),
            state,
            bus,
        }
    }

    pub fn state(&self) -> &LockStateStore {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn current_app(&self) -> Option<&AppId> {
        self.source.current_app()
    }

    pub fn accumulator(&self) -> &UsageAccumulator {
        &self.accumulator
    }

    // Signal path

    /// Apply a pushed host signal
    pub fn observe_signal(&mut self, signal: &HostSignal) -> Vec<CoreEvent> {
        let at = signal.at();
        let mut events = self.rollover_if_needed(at);
        let transitions = self.source.observe(signal);
        events.extend(self.apply_transitions(transitions));
        events
    }

    /// Apply a poll answer, then enforce any lock on the current app
    pub fn observe_poll(&mut self, app: Option<&AppId>, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = self.rollover_if_needed(now);
        let transitions = self.source.observe_poll(app, now);
        events.extend(self.apply_transitions(transitions));
        events.extend(self.enforce_current(now));
        events
    }

    fn apply_transitions(&mut self, transitions: Vec<ForegroundTransition>) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        for transition in transitions {
            let result = if transition.is_enter() {
                self.on_enter(&transition.app, transition.timestamp)
            } else {
                self.on_exit(&transition.app, transition.timestamp)
            };

            match result {
                Ok(mut produced) => events.append(&mut produced),
                Err(e) => warn!(
                    app = %transition.app,
                    kind = ?transition.kind,
                    error = %e,
                    "Failed to apply transition"
                ),
            }
        }

        events
    }

    fn on_enter(&mut self, app: &AppId, at: DateTime<Local>) -> StoreResult<Vec<CoreEvent>> {
        // The manual override lasts until the app's next entry, which is
        // evaluated normally
        if self.state.unlock_override(app)? {
            self.state.set_unlock_override(app, false)?;
            debug!(app = %app, "Unlock override cleared on entry");
        }

        let evaluation = self.evaluator.reconcile(app)?;
        let mut events = Vec::new();

        match evaluation.transition {
            Some(LockTransition::Locked) => {
                events.push(self.on_locked(&evaluation, at));
                return Ok(events);
            }
            Some(LockTransition::Unlocked) => events.push(self.on_unlocked(app, false)),
            None => {}
        }

        if evaluation.locked {
            events.extend(self.block(&evaluation, at));
        } else {
            self.accumulator.enter(app, at);
        }

        Ok(events)
    }

    fn on_exit(&mut self, app: &AppId, at: DateTime<Local>) -> StoreResult<Vec<CoreEvent>> {
        let credited = self.accumulator.exit(app, at)?;
        if credited.is_zero() {
            return Ok(Vec::new());
        }
        self.evaluate_credited(app, at)
    }

    fn evaluate_credited(&mut self, app: &AppId, at: DateTime<Local>) -> StoreResult<Vec<CoreEvent>> {
        let evaluation = self.evaluator.reconcile(app)?;
        Ok(match evaluation.transition {
            Some(LockTransition::Locked) => vec![self.on_locked(&evaluation, at)],
            Some(LockTransition::Unlocked) => vec![self.on_unlocked(app, false)],
            None => Vec::new(),
        })
    }

    fn on_locked(&mut self, evaluation: &Evaluation, at: DateTime<Local>) -> CoreEvent {
        let app = &evaluation.app;
        let limit = evaluation.limit.unwrap_or_default();

        self.accumulator.discard(app);
        self.source.forget(app);
        self.block_debounce.reset(app);
        self.block_debounce.check(app, at);

        info!(
            app = %app,
            used_secs = evaluation.used.as_secs(),
            limit_secs = limit.as_secs(),
            "App locked"
        );
        self.state.audit(AuditEventType::AppLocked {
            app_id: app.clone(),
            used_secs: evaluation.used.as_secs(),
            limit_minutes: limit.as_secs() / 60,
        });
        self.bus.publish(EventPayload::Locked {
            app_id: app.clone(),
        });

        CoreEvent::Locked {
            app: app.clone(),
            used: evaluation.used,
            limit,
        }
    }

    fn on_unlocked(&mut self, app: &AppId, manual: bool) -> CoreEvent {
        self.block_debounce.reset(app);

        info!(app = %app, manual, "App unlocked");
        self.state.audit(AuditEventType::AppUnlocked {
            app_id: app.clone(),
            manual,
        });
        self.bus.publish(EventPayload::Unlocked {
            app_id: app.clone(),
        });

        CoreEvent::Unlocked { app: app.clone() }
    }

    /// Re-block a locked app that came back to the foreground
    fn block(&mut self, evaluation: &Evaluation, at: DateTime<Local>) -> Option<CoreEvent> {
        let app = &evaluation.app;
        self.accumulator.discard(app);
        // Forget it so the next sighting is a fresh entry
        self.source.forget(app);

        if !self.block_debounce.check(app, at) {
            debug!(app = %app, "Block request debounced");
            return None;
        }

        debug!(app = %app, "Locked app in foreground, blocking");
        Some(CoreEvent::Blocked {
            app: app.clone(),
            used: evaluation.used,
            limit: evaluation.limit.unwrap_or_default(),
        })
    }

    /// Enforce a lock on the current app set from outside this engine
    pub fn enforce_current(&mut self, now: DateTime<Local>) -> Option<CoreEvent> {
        let app = self.source.current_app()?.clone();

        let evaluation = match self.evaluator.reconcile(&app) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(app = %app, error = %e, "Failed to evaluate current app");
                return None;
            }
        };

        match evaluation.transition {
            Some(LockTransition::Locked) => Some(self.on_locked(&evaluation, now)),
            _ if evaluation.locked => self.block(&evaluation, now),
            _ => None,
        }
    }

    // Timers

    /// Credit long-running sessions and evaluate the apps that were credited
    pub fn flush(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = self.rollover_if_needed(now);
        self.block_debounce
            .cleanup(now, self.block_debounce.window() * 30);

        let credited = match self.accumulator.flush(now) {
            Ok(credited) => credited,
            Err(e) => {
                warn!(error = %e, "Failed to flush usage");
                return events;
            }
        };

        for (app, _) in credited {
            match self.evaluate_credited(&app, now) {
                Ok(mut produced) => events.append(&mut produced),
                Err(e) => warn!(app = %app, error = %e, "Failed to evaluate after flush"),
            }
        }

        events
    }

    /// Zero usage on the first activity of a new calendar day
    pub fn rollover_if_needed(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        match self.try_rollover(now) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Daily rollover check failed");
                Vec::new()
            }
        }
    }

    fn try_rollover(&mut self, now: DateTime<Local>) -> StoreResult<Vec<CoreEvent>> {
        let today = warden_util::day_of(now);
        let stored = self.state.usage_day()?;

        if stored == Some(today) {
            return Ok(Vec::new());
        }

        if stored.is_none() {
            self.state.set_usage_day(today)?;
            return Ok(Vec::new());
        }

        // Time after midnight still belongs to today
        let reset_at = warden_util::start_of_day(today)
            .filter(|midnight| *midnight <= now)
            .unwrap_or(now);

        info!(day = %warden_util::day_key(today), "New day, resetting usage");
        self.accumulator.reset_all(reset_at)?;
        for app in self.state.known_apps()? {
            if self.state.unlock_override(&app)? {
                self.state.set_unlock_override(&app, false)?;
            }
        }
        self.state.set_usage_day(today)?;

        self.state.audit(AuditEventType::UsageReset {
            reason: ResetReason::DailyRollover,
        });
        self.bus.publish(EventPayload::UsageReset {
            reason: ResetReason::DailyRollover,
        });

        self.reconcile_all(now)
    }

    fn reconcile_all(&mut self, now: DateTime<Local>) -> StoreResult<Vec<CoreEvent>> {
        let mut events = Vec::new();
        for evaluation in self.evaluator.reconcile_all()? {
            match evaluation.transition {
                Some(LockTransition::Locked) => events.push(self.on_locked(&evaluation, now)),
                Some(LockTransition::Unlocked) => {
                    events.push(self.on_unlocked(&evaluation.app, false))
                }
                None => {}
            }
        }
        Ok(events)
    }

    /// Credit and close every open session (loop teardown)
    pub fn close_all(&mut self, now: DateTime<Local>) {
        if let Some(app) = self.source.current_app().cloned() {
            if let Err(e) = self.accumulator.exit(&app, now) {
                warn!(app = %app, error = %e, "Failed to credit session on teardown");
            }
        }
        self.accumulator.clear();
        self.source.reset();
    }

    // Commands

    /// Configure a daily limit; zero minutes means unlimited
    pub fn set_limit(&mut self, app: &AppId, minutes: u64) -> StoreResult<Vec<CoreEvent>> {
        let mut limits = self.state.limits()?;
        limits.insert(app.clone(), minutes);
        self.state.set_limits(&limits)?;

        info!(app = %app, minutes, "Limit set");
        self.state.audit(AuditEventType::LimitSet {
            app_id: app.clone(),
            minutes,
        });
        self.bus.publish(EventPayload::LimitSet {
            app_id: app.clone(),
            minutes,
        });

        self.reconcile_all(warden_util::now())
    }

    /// Remove a daily limit; the app is always unlocked afterwards
    pub fn remove_limit(&mut self, app: &AppId) -> StoreResult<Vec<CoreEvent>> {
        let mut limits = self.state.limits()?;
        limits.remove(app);
        self.state.set_limits(&limits)?;

        info!(app = %app, "Limit removed");
        self.state.audit(AuditEventType::LimitRemoved {
            app_id: app.clone(),
        });
        self.bus.publish(EventPayload::LimitRemoved {
            app_id: app.clone(),
        });

        self.reconcile_all(warden_util::now())
    }

    /// Zero every usage counter and re-evaluate locks
    pub fn reset_all_usage(&mut self, now: DateTime<Local>) -> StoreResult<Vec<CoreEvent>> {
        self.accumulator.reset_all(now)?;
        self.state.set_usage_day(warden_util::day_of(now))?;

        info!("Usage reset");
        self.state.audit(AuditEventType::UsageReset {
            reason: ResetReason::Manual,
        });
        self.bus.publish(EventPayload::UsageReset {
            reason: ResetReason::Manual,
        });

        self.reconcile_all(now)
    }

    /// Manual override: unlock now without touching usage
    ///
    /// An app that is not locked gets no override, so it still locks when it
    /// crosses its budget.
    pub fn unlock(&mut self, app: &AppId) -> StoreResult<Vec<CoreEvent>> {
        if !self.state.is_locked(app)? {
            debug!(app = %app, "Unlock requested for an app that is not locked");
            return Ok(Vec::new());
        }

        self.state.set_unlock_override(app, true)?;
        self.state.set_locked(app, false)?;
        Ok(vec![self.on_unlocked(app, true)])
    }

    pub fn get_usage(&self, app: &AppId) -> StoreResult<Duration> {
        self.state.usage_of(app)
    }

    /// Daily limit; zero means unlimited
    pub fn get_limit(&self, app: &AppId) -> StoreResult<Duration> {
        Ok(self.state.limit_for(app)?.unwrap_or(Duration::ZERO))
    }

    pub fn is_locked(&self, app: &AppId) -> StoreResult<bool> {
        self.state.is_locked(app)
    }

    /// Budget status of one app, or of every known app
    pub fn status(&self, app: Option<&AppId>) -> StoreResult<Vec<AppStatus>> {
        let apps: Vec<AppId> = match app {
            Some(app) => vec![app.clone()],
            None => self.state.known_apps()?.into_iter().collect(),
        };

        apps.into_iter()
            .map(|app| {
                Ok(AppStatus {
                    used: self.state.usage_of(&app)?,
                    limit: self.state.limit_for(&app)?,
                    locked: self.state.is_locked(&app)?,
                    app_id: app,
                })
            })
            .collect()
    }

    pub fn set_auto_restart(&mut self, enabled: bool) -> StoreResult<()> {
        self.state.set_auto_restart_enabled(enabled)?;
        info!(enabled, "Auto-restart updated");
        Ok(())
    }

    /// Dispatch a command, returning the response and any host effects
    pub fn handle_command(
        &mut self,
        command: Command,
        now: DateTime<Local>,
    ) -> (Response, Vec<CoreEvent>) {
        let mut events = self.rollover_if_needed(now);

        let result: StoreResult<ResponsePayload> = match command {
            Command::SetLimit { app_id, minutes } => {
                self.set_limit(&app_id, minutes).map(|mut produced| {
                    events.append(&mut produced);
                    ResponsePayload::LimitSet { app_id, minutes }
                })
            }
            Command::RemoveLimit { app_id } => self.remove_limit(&app_id).map(|mut produced| {
                events.append(&mut produced);
                ResponsePayload::LimitRemoved { app_id }
            }),
            Command::ResetAllUsage => self.reset_all_usage(now).map(|mut produced| {
                events.append(&mut produced);
                ResponsePayload::UsageReset
            }),
            Command::Unlock { app_id } => self.unlock(&app_id).map(|mut produced| {
                events.append(&mut produced);
                ResponsePayload::Unlocked { app_id }
            }),
            Command::GetUsage { app_id } => self
                .get_usage(&app_id)
                .map(|used| ResponsePayload::Usage { app_id, used }),
            Command::GetLimit { app_id } => self
                .get_limit(&app_id)
                .map(|limit| ResponsePayload::Limit { app_id, limit }),
            Command::IsLocked { app_id } => self
                .is_locked(&app_id)
                .map(|locked| ResponsePayload::Locked { app_id, locked }),
            Command::Status { app_id } => self
                .status(app_id.as_ref())
                .map(|apps| ResponsePayload::Status { apps }),
            Command::SetAutoRestart { enabled } => self
                .set_auto_restart(enabled)
                .map(|()| ResponsePayload::AutoRestartSet { enabled }),
        };

        let response = match result {
            Ok(payload) => Response::success(payload),
            Err(e) => {
                warn!(error = %e, "Command failed");
                Response::error(ErrorInfo::new(ErrorCode::StoreError, e.to_string()))
            }
        };

        (response, events)
    }
}
