//! Foreground signal reconciliation
//!
//! The host reports the foreground app through two channels that overlap:
//! a push channel that can miss changes while the observer sleeps, and a
//! poll that repeats the same answer every tick. Both feed one reconciler
//! that keeps a single notion of the current app and turns changes into
//! EXIT/ENTER transitions.

use chrono::{DateTime, Local};
use std::collections::HashSet;
use tracing::debug;
use warden_api::{ForegroundTransition, SignalOrigin};
use warden_host_api::HostSignal;
use warden_util::AppId;

/// Reconciles event and poll observations into ordered transitions
#[derive(Debug)]
pub struct ForegroundSignalSource {
    current_app: Option<AppId>,
    last_applied: Option<DateTime<Local>>,
    screen_on: bool,
    system_apps: HashSet<AppId>,
}

impl ForegroundSignalSource {
    pub fn new(system_apps: impl IntoIterator<Item = AppId>) -> Self {
        Self {
            current_app: None,
            last_applied: None,
            screen_on: true,
            system_apps: system_apps.into_iter().collect(),
        }
    }

    pub fn current_app(&self) -> Option<&AppId> {
        self.current_app.as_ref()
    }

    pub fn is_screen_on(&self) -> bool {
        self.screen_on
    }

    pub fn is_system_app(&self, app: &AppId) -> bool {
        self.system_apps.contains(app)
    }

    /// Forget everything; used when the enforcement loop restarts
    pub fn reset(&mut self) {
        self.current_app = None;
        self.last_applied = None;
        self.screen_on = true;
    }

    /// Drop `app` as the current app without emitting anything, so its next
    /// sighting is treated as a fresh entry
    pub fn forget(&mut self, app: &AppId) {
        if self.current_app.as_ref() == Some(app) {
            self.current_app = None;
        }
    }

    /// Apply a pushed host signal
    pub fn observe(&mut self, signal: &HostSignal) -> Vec<ForegroundTransition> {
        match signal {
            HostSignal::ForegroundChanged { app, at } => {
                self.observe_app(app, *at, SignalOrigin::Event)
            }
            HostSignal::ScreenOff { at } => self.screen_off(*at),
            HostSignal::ScreenOn { at } => {
                if self.is_stale(*at) {
                    return Vec::new();
                }
                self.screen_on = true;
                self.last_applied = Some(*at);
                Vec::new()
            }
        }
    }

    /// Apply a poll answer; "no app" is not a change
    pub fn observe_poll(&mut self, app: Option<&AppId>, at: DateTime<Local>) -> Vec<ForegroundTransition> {
        match app {
            Some(app) => self.observe_app(app, at, SignalOrigin::Poll),
            None => Vec::new(),
        }
    }

    fn is_stale(&self, at: DateTime<Local>) -> bool {
        self.last_applied.is_some_and(|last| at < last)
    }

    fn observe_app(
        &mut self,
        app: &AppId,
        at: DateTime<Local>,
        origin: SignalOrigin,
    ) -> Vec<ForegroundTransition> {
        if !self.screen_on {
            debug!(app = %app, ?origin, "Foreground signal while screen off, dropped");
            return Vec::new();
        }

        if self.is_stale(at) {
            debug!(app = %app, ?origin, at = %at, "Stale foreground signal, dropped");
            return Vec::new();
        }

        if self.current_app.as_ref() == Some(app) {
            return Vec::new();
        }

        let mut transitions = Vec::with_capacity(2);
        if let Some(previous) = self.current_app.take() {
            transitions.push(ForegroundTransition::exit(previous, at));
        }

        if self.system_apps.contains(app) {
            debug!(app = %app, ?origin, "System app in foreground");
        } else {
            debug!(app = %app, ?origin, "Foreground changed");
            transitions.push(ForegroundTransition::enter(app.clone(), at));
            self.current_app = Some(app.clone());
        }

        if !transitions.is_empty() {
            self.last_applied = Some(at);
        }
        transitions
    }

    fn screen_off(&mut self, at: DateTime<Local>) -> Vec<ForegroundTransition> {
        if self.is_stale(at) {
            return Vec::new();
        }

        self.screen_on = false;
        self.last_applied = Some(at);

        match self.current_app.take() {
            Some(app) => {
                debug!(app = %app, "Screen off, closing foreground app");
                vec![ForegroundTransition::exit(app, at)]
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use warden_api::TransitionKind;

    fn t(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn fg(app: &str, secs: i64) -> HostSignal {
        HostSignal::ForegroundChanged {
            app: AppId::new(app),
            at: t(secs),
        }
    }

    fn kinds(transitions: &[ForegroundTransition]) -> Vec<(String, TransitionKind)> {
        transitions
            .iter()
            .map(|tr| (tr.app.to_string(), tr.kind))
            .collect()
    }

    #[test]
    fn first_signal_enters() {
        let mut source = ForegroundSignalSource::new([]);
        let out = source.observe(&fg("app.x", 0));

        assert_eq!(kinds(&out), vec![("app.x".into(), TransitionKind::Enter)]);
        assert_eq!(source.current_app(), Some(&AppId::new("app.x")));
    }

    #[test]
    fn switch_emits_exit_then_enter() {
        let mut source = ForegroundSignalSource::new([]);
        source.observe(&fg("app.x", 0));
        let out = source.observe(&fg("app.y", 10));

        assert_eq!(
            kinds(&out),
            vec![
                ("app.x".into(), TransitionKind::Exit),
                ("app.y".into(), TransitionKind::Enter)
            ]
        );
        assert!(out.iter().all(|tr| tr.timestamp == t(10)));
    }

    #[test]
    fn duplicates_across_channels_are_suppressed() {
        let mut source = ForegroundSignalSource::new([]);
        let app = AppId::new("app.x");

        assert_eq!(source.observe(&fg("app.x", 0)).len(), 1);
        assert!(source.observe_poll(Some(&app), t(1)).is_empty());
        assert!(source.observe_poll(Some(&app), t(2)).is_empty());
        assert!(source.observe(&fg("app.x", 3)).is_empty());
    }

    #[test]
    fn poll_fills_missed_event() {
        let mut source = ForegroundSignalSource::new([]);
        source.observe(&fg("app.x", 0));

        let out = source.observe_poll(Some(&AppId::new("app.y")), t(5));
        assert_eq!(out.len(), 2);
        assert_eq!(source.current_app(), Some(&AppId::new("app.y")));
    }

    #[test]
    fn empty_poll_is_not_a_change() {
        let mut source = ForegroundSignalSource::new([]);
        source.observe(&fg("app.x", 0));

        assert!(source.observe_poll(None, t(5)).is_empty());
        assert_eq!(source.current_app(), Some(&AppId::new("app.x")));
    }

    #[test]
    fn stale_signal_is_dropped() {
        let mut source = ForegroundSignalSource::new([]);
        source.observe(&fg("app.x", 10));

        assert!(source.observe(&fg("app.y", 5)).is_empty());
        assert_eq!(source.current_app(), Some(&AppId::new("app.x")));
    }

    #[test]
    fn system_app_closes_previous_and_clears() {
        let mut source = ForegroundSignalSource::new([AppId::new("launcher")]);
        source.observe(&fg("app.x", 0));

        let out = source.observe(&fg("launcher", 10));
        assert_eq!(kinds(&out), vec![("app.x".into(), TransitionKind::Exit)]);
        assert_eq!(source.current_app(), None);

        assert!(source.observe(&fg("launcher", 11)).is_empty());
    }

    #[test]
    fn screen_off_exits_and_blocks_until_next_transition() {
        let mut source = ForegroundSignalSource::new([]);
        source.observe(&fg("app.y", 0));

        let out = source.observe(&HostSignal::ScreenOff { at: t(180) });
        assert_eq!(kinds(&out), vec![("app.y".into(), TransitionKind::Exit)]);
        assert_eq!(out[0].timestamp, t(180));

        // Foreground signals while dark are ignored
        assert!(source.observe(&fg("app.y", 200)).is_empty());

        // Screen on alone does not enter anything
        assert!(source.observe(&HostSignal::ScreenOn { at: t(300) }).is_empty());
        assert_eq!(source.current_app(), None);

        let out = source.observe_poll(Some(&AppId::new("app.y")), t(301));
        assert_eq!(kinds(&out), vec![("app.y".into(), TransitionKind::Enter)]);
    }

    #[test]
    fn forgotten_app_reenters() {
        let mut source = ForegroundSignalSource::new([]);
        let app = AppId::new("app.x");
        source.observe(&fg("app.x", 0));

        source.forget(&AppId::new("app.y"));
        assert_eq!(source.current_app(), Some(&app));

        source.forget(&app);
        let out = source.observe_poll(Some(&app), t(1));
        assert_eq!(kinds(&out), vec![("app.x".into(), TransitionKind::Enter)]);
    }

    #[test]
    fn reset_forgets_current_app() {
        let mut source = ForegroundSignalSource::new([]);
        source.observe(&fg("app.x", 10));
        source.reset();

        assert_eq!(source.current_app(), None);
        // An older timestamp is accepted after a reset
        assert_eq!(source.observe(&fg("app.x", 5)).len(), 1);
    }
}
