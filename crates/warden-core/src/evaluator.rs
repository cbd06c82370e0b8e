//! Limit evaluation with unlock hysteresis

use std::time::Duration;
use tracing::debug;
use warden_store::StoreResult;
use warden_util::AppId;

use crate::LockStateStore;

/// Lock decision for one app.
///
/// - no limit: never locked
/// - manual unlock override in force: not locked
/// - otherwise locked once usage reaches the limit
pub fn evaluate(accumulated: Duration, limit: Option<Duration>, overridden: bool) -> bool {
    match limit {
        None => false,
        Some(_) if overridden => false,
        Some(limit) => accumulated >= limit,
    }
}

/// Change of the stored lock flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    Locked,
    Unlocked,
}

impl LockTransition {
    pub fn between(was_locked: bool, now_locked: bool) -> Option<Self> {
        match (was_locked, now_locked) {
            (false, true) => Some(LockTransition::Locked),
            (true, false) => Some(LockTransition::Unlocked),
            _ => None,
        }
    }
}

/// Outcome of evaluating one app against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub app: AppId,
    pub used: Duration,
    pub limit: Option<Duration>,
    pub locked: bool,
    pub transition: Option<LockTransition>,
}

/// Applies [`evaluate`] to stored usage/limits and persists the flag
#[derive(Clone)]
pub struct LimitEvaluator {
    state: LockStateStore,
}

impl LimitEvaluator {
    pub fn new(state: LockStateStore) -> Self {
        Self { state }
    }

    /// Re-evaluate one app and write its lock flag if the decision changed
    pub fn reconcile(&self, app: &AppId) -> StoreResult<Evaluation> {
        let used = self.state.usage_of(app)?;
        let limit = self.state.limit_for(app)?;
        let overridden = self.state.unlock_override(app)?;
        let was_locked = self.state.is_locked(app)?;

        let locked = evaluate(used, limit, overridden);
        let transition = LockTransition::between(was_locked, locked);

        if transition.is_some() {
            self.state.set_locked(app, locked)?;
            debug!(app = %app, locked, used_secs = used.as_secs(), "Lock flag changed");
        }

        Ok(Evaluation {
            app: app.clone(),
            used,
            limit,
            locked,
            transition,
        })
    }

    /// Re-evaluate every known app
    pub fn reconcile_all(&self) -> StoreResult<Vec<Evaluation>> {
        self.state
            .known_apps()?
            .iter()
            .map(|app| self.reconcile(app))
            .collect()
    }
}
