//! Watchdog supervision of the long-running loops
//!
//! Liveness is judged only from heartbeat records in the durable store, so
//! the same check works in-process and from a fresh process started by a
//! deferred wake.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{EventPayload, HeartbeatRecord, LoopName, WakePayload, WatchdogState};
use warden_config::WatchdogSettings;
use warden_store::{AuditEventType, StoreResult};
use warden_util::elapsed_between;

use crate::{EventBus, LockStateStore};

/// Something the supervisor wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Re-run startup of a loop (idempotent)
    RestartLoop(LoopName),

    /// Ask the host scheduler for a durable wake
    ScheduleDeferredWake {
        delay: Duration,
        payload: WakePayload,
    },

    /// Ask the user for the monitoring grant
    PromptForGrant,

    /// Tell the user enforcement stopped and will not recover by itself
    NotifyLoopDead,
}

/// Heartbeat-driven supervisor
pub struct WatchdogSupervisor {
    state: LockStateStore,
    settings: WatchdogSettings,
    bus: EventBus,
    states: HashMap<LoopName, WatchdogState>,
}

impl WatchdogSupervisor {
    pub fn new(state: LockStateStore, settings: WatchdogSettings, bus: EventBus) -> Self {
        Self {
            state,
            settings,
            bus,
            states: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &WatchdogSettings {
        &self.settings
    }

    /// Last classification of a loop
    pub fn loop_state(&self, loop_name: LoopName) -> WatchdogState {
        self.states
            .get(&loop_name)
            .copied()
            .unwrap_or(WatchdogState::Starting)
    }

    /// Persisted flag, falling back to the configured default
    pub fn auto_restart_enabled(&self) -> bool {
        match self.state.auto_restart_enabled() {
            Ok(Some(enabled)) => enabled,
            Ok(None) => self.settings.auto_restart,
            Err(e) => {
                warn!(error = %e, "Failed to read auto-restart flag, using default");
                self.settings.auto_restart
            }
        }
    }

    /// Record a liveness beat for `loop_name`
    pub fn beat(&mut self, loop_name: LoopName, now: DateTime<Local>) -> StoreResult<()> {
        self.state.set_heartbeat(loop_name, &HeartbeatRecord::beat(now))?;
        self.states.insert(loop_name, WatchdogState::Running);
        debug!(loop_name = %loop_name, "Heartbeat");
        Ok(())
    }

    /// Classify a loop from its stored heartbeat
    pub fn classify(&self, loop_name: LoopName, now: DateTime<Local>) -> StoreResult<WatchdogState> {
        Ok(match self.state.heartbeat(loop_name)? {
            Some(record) if record.active && !record.is_stale(now, self.settings.stale_after) => {
                WatchdogState::Running
            }
            _ => WatchdogState::Stale,
        })
    }

    /// One supervision cycle over `loops`
    ///
    /// A cycle that finds stale loops restarts each of them once and
    /// schedules exactly one deferred retry.
    pub fn check(
        &mut self,
        loops: &[LoopName],
        now: DateTime<Local>,
        grant_present: bool,
    ) -> StoreResult<Vec<WatchdogAction>> {
        let mut stale = Vec::new();
        for &loop_name in loops {
            let classified = self.classify(loop_name, now)?;
            if classified == WatchdogState::Stale {
                stale.push(loop_name);
            }
            self.states.insert(loop_name, classified);
        }

        if grant_present && self.state.grant_needed()? {
            info!("Monitoring grant restored");
            self.state.set_grant_needed(false)?;
        }

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        if !self.auto_restart_enabled() {
            warn!(loops = ?stale, "Loop stale and auto-restart is disabled");
            if self.throttle_elapsed(self.state.loop_dead_notified_at()?, now) {
                self.state.set_loop_dead_notified_at(now)?;
                self.state.audit(AuditEventType::EnforcementStopped);
                return Ok(vec![WatchdogAction::NotifyLoopDead]);
            }
            return Ok(Vec::new());
        }

        if !grant_present {
            warn!("Monitoring grant missing, enforcement stays dormant");
            if !self.state.grant_needed()? {
                self.state.set_grant_needed(true)?;
                self.bus.publish(EventPayload::GrantRequired);
            }
            if self.throttle_elapsed(self.state.grant_prompted_at()?, now) {
                self.state.set_grant_prompted_at(now)?;
                self.state.audit(AuditEventType::GrantPromptRaised);
                return Ok(vec![WatchdogAction::PromptForGrant]);
            }
            return Ok(Vec::new());
        }

        let mut actions = Vec::with_capacity(stale.len() + 1);
        for loop_name in stale {
            info!(loop_name = %loop_name, "Heartbeat stale, restarting loop");
            self.states.insert(loop_name, WatchdogState::Restarting);
            self.state.audit(AuditEventType::LoopRestarted { loop_name });
            self.bus.publish(EventPayload::LoopRestarted { loop_name });
            actions.push(WatchdogAction::RestartLoop(loop_name));
        }
        actions.push(WatchdogAction::ScheduleDeferredWake {
            delay: self.settings.retry_delay,
            payload: WakePayload::RestartLoop,
        });

        Ok(actions)
    }

    /// Mark a loop dead on teardown and, with auto-restart on, ask for a
    /// deferred restart
    pub fn on_teardown(
        &mut self,
        loop_name: LoopName,
        now: DateTime<Local>,
    ) -> StoreResult<Vec<WatchdogAction>> {
        self.mark_inactive(loop_name, now)?;

        if !self.auto_restart_enabled() {
            return Ok(Vec::new());
        }

        Ok(vec![WatchdogAction::ScheduleDeferredWake {
            delay: self.settings.retry_delay,
            payload: WakePayload::RestartLoop,
        }])
    }

    /// Flag a loop's heartbeat inactive, keeping its last beat
    pub fn mark_inactive(&mut self, loop_name: LoopName, now: DateTime<Local>) -> StoreResult<()> {
        let last_beat = self
            .state
            .heartbeat(loop_name)?
            .map(|record| record.last_beat)
            .unwrap_or(now);
        self.state.set_heartbeat(
            loop_name,
            &HeartbeatRecord {
                last_beat,
                active: false,
            },
        )?;
        self.states.insert(loop_name, WatchdogState::Stale);
        info!(loop_name = %loop_name, "Loop marked inactive");
        Ok(())
    }

    /// Keep one out-of-process check pending at all times
    ///
    /// Returns the wake to schedule, or `None` if one is already pending.
    pub fn guaranteed_check(&mut self, now: DateTime<Local>) -> StoreResult<Option<WatchdogAction>> {
        if let Some(due) = self.state.guaranteed_check_due_at()?
            && due > now
        {
            debug!(due = %due, "Guaranteed check already pending");
            return Ok(None);
        }

        self.reschedule_guaranteed_check(now).map(Some)
    }

    /// Schedule the next out-of-process check unconditionally
    pub fn reschedule_guaranteed_check(&mut self, now: DateTime<Local>) -> StoreResult<WatchdogAction> {
        let delay = self.settings.guaranteed_check_interval;
        self.state
            .set_guaranteed_check_due_at(warden_util::add_duration(now, delay))?;

        Ok(WatchdogAction::ScheduleDeferredWake {
            delay,
            payload: WakePayload::WatchdogCheck,
        })
    }

    fn throttle_elapsed(&self, last: Option<DateTime<Local>>, now: DateTime<Local>) -> bool {
        last.is_none_or(|last| elapsed_between(last, now) >= self.settings.prompt_interval)
    }
}
