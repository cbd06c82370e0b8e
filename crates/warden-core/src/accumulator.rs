//! Usage accumulation from foreground transitions

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use warden_store::StoreResult;
use warden_util::{elapsed_between, AppId};

use crate::LockStateStore;

/// In-memory session for an app currently in the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSession {
    /// Start of the not-yet-credited span
    pub start: DateTime<Local>,
    /// Whether part of the session has already been credited
    pub flushed: bool,
}

/// Converts sessions into persisted per-app usage
///
/// Open sessions live only in memory; the persisted usage map is the source
/// of truth after a restart.
pub struct UsageAccumulator {
    state: LockStateStore,
    sessions: HashMap<AppId, OpenSession>,
    noise_threshold: Duration,
    flush_interval: Duration,
}

impl UsageAccumulator {
    pub fn new(state: LockStateStore, noise_threshold: Duration, flush_interval: Duration) -> Self {
        Self {
            state,
            sessions: HashMap::new(),
            noise_threshold,
            flush_interval,
        }
    }

    pub fn open_session(&self, app: &AppId) -> Option<&OpenSession> {
        self.sessions.get(app)
    }

    /// Open a session unless one is already open; returns whether it opened
    pub fn enter(&mut self, app: &AppId, at: DateTime<Local>) -> bool {
        if self.sessions.contains_key(app) {
            return false;
        }

        self.sessions.insert(
            app.clone(),
            OpenSession {
                start: at,
                flushed: false,
            },
        );
        debug!(app = %app, "Session opened");
        true
    }

    /// Close a session, crediting it unless it is noise; returns the credit
    pub fn exit(&mut self, app: &AppId, at: DateTime<Local>) -> StoreResult<Duration> {
        let Some(session) = self.sessions.remove(app) else {
            return Ok(Duration::ZERO);
        };

        let delta = elapsed_between(session.start, at);
        if !session.flushed && delta <= self.noise_threshold {
            debug!(app = %app, millis = delta.as_millis() as u64, "Session below noise threshold, discarded");
            return Ok(Duration::ZERO);
        }

        self.credit(app, session.start, at)
    }

    /// Credit every session open longer than the flush interval and restart it at `now`
    pub fn flush(&mut self, now: DateTime<Local>) -> StoreResult<Vec<(AppId, Duration)>> {
        let due: Vec<(AppId, DateTime<Local>)> = self
            .sessions
            .iter()
            .filter(|(_, s)| elapsed_between(s.start, now) >= self.flush_interval)
            .map(|(app, s)| (app.clone(), s.start))
            .collect();

        let mut credited = Vec::with_capacity(due.len());
        for (app, start) in due {
            let delta = self.credit(&app, start, now)?;
            if let Some(session) = self.sessions.get_mut(&app) {
                session.start = now;
                session.flushed = true;
            }
            credited.push((app, delta));
        }
        Ok(credited)
    }

    /// Close a session without crediting it
    pub fn discard(&mut self, app: &AppId) -> bool {
        let removed = self.sessions.remove(app).is_some();
        if removed {
            debug!(app = %app, "Session discarded");
        }
        removed
    }

    /// Drop every open session (loop teardown)
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Zero all usage and rebase open sessions to `now`
    pub fn reset_all(&mut self, now: DateTime<Local>) -> StoreResult<()> {
        self.state.reset_usage(now)?;

        for session in self.sessions.values_mut() {
            session.start = now;
        }
        Ok(())
    }

    fn credit(
        &self,
        app: &AppId,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> StoreResult<Duration> {
        // A reset issued elsewhere may postdate this session's start
        let (delta, total_ms) = self.state.credit_usage(app, start, end)?;
        if delta.is_zero() {
            return Ok(Duration::ZERO);
        }

        debug!(
            app = %app,
            credited_ms = delta.as_millis() as u64,
            total_ms,
            "Usage credited"
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use warden_store::SqliteStore;

    fn t(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn make() -> (LockStateStore, UsageAccumulator) {
        let state = LockStateStore::new(Arc::new(SqliteStore::in_memory().unwrap()));
        let acc = UsageAccumulator::new(
            state.clone(),
            Duration::from_secs(1),
            Duration::from_secs(30),
        );
        (state, acc)
    }

    #[test]
    fn session_credited_on_exit() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        assert!(acc.enter(&app, t(0)));
        assert_eq!(acc.exit(&app, t(90)).unwrap(), Duration::from_secs(90));
        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(90));
        assert!(acc.open_session(&app).is_none());
    }

    #[test]
    fn duplicate_enter_does_not_restart_session() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        assert!(acc.enter(&app, t(0)));
        assert!(!acc.enter(&app, t(20)));
        acc.exit(&app, t(25)).unwrap();

        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(25));
    }

    #[test]
    fn duplicate_exit_credits_once() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        acc.enter(&app, t(0));
        acc.exit(&app, t(10)).unwrap();
        assert_eq!(acc.exit(&app, t(10)).unwrap(), Duration::ZERO);

        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn noise_sessions_discarded() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");
        let t0 = t(0);

        acc.enter(&app, t0);
        acc.exit(&app, t0 + chrono::Duration::milliseconds(800)).unwrap();

        assert_eq!(state.usage_of(&app).unwrap(), Duration::ZERO);
    }

    #[test]
    fn flush_credits_long_sessions_and_advances_start() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        acc.enter(&app, t(0));
        assert!(acc.flush(t(20)).unwrap().is_empty());

        let credited = acc.flush(t(30)).unwrap();
        assert_eq!(credited, vec![(app.clone(), Duration::from_secs(30))]);
        assert_eq!(acc.open_session(&app).unwrap().start, t(30));

        // Remainder below the noise threshold still counts after a flush
        let t_exit = t(30) + chrono::Duration::milliseconds(500);
        acc.exit(&app, t_exit).unwrap();
        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_millis(30_500));
    }

    #[test]
    fn discard_drops_time() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        acc.enter(&app, t(0));
        assert!(acc.discard(&app));
        acc.exit(&app, t(100)).unwrap();

        assert_eq!(state.usage_of(&app).unwrap(), Duration::ZERO);
    }

    #[test]
    fn reset_rebases_open_sessions() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        acc.enter(&app, t(0));
        acc.flush(t(60)).unwrap();
        acc.reset_all(t(100)).unwrap();
        assert_eq!(state.usage_of(&app).unwrap(), Duration::ZERO);

        acc.exit(&app, t(130)).unwrap();
        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn external_reset_clamps_session_start() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        acc.enter(&app, t(0));
        // Another process resets usage while the session is open
        state.reset_usage(t(50)).unwrap();

        acc.exit(&app, t(80)).unwrap();
        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn replay_sums_sessions_above_threshold() {
        let (state, mut acc) = make();
        let app = AppId::new("app.x");

        let sessions = [(0, 60), (100, 100), (200, 245), (300, 301), (400, 520)];
        for (start, end) in sessions {
            acc.enter(&app, t(start));
            acc.enter(&app, t(start));
            acc.exit(&app, t(end)).unwrap();
            acc.exit(&app, t(end)).unwrap();
        }

        // 60 + 45 + 120; the zero and 1 s sessions are noise
        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(225));
    }
}
