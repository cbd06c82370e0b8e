//! Keyed debouncing for repeated requests

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use crate::elapsed_between;

/// Suppresses repeats of the same key inside a fixed window
///
/// Used to keep the lock screen from being re-presented while the previous
/// presentation is still settling.
#[derive(Debug)]
pub struct Debouncer<K> {
    window: Duration,
    last_fired: HashMap<K, DateTime<Local>>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: HashMap::new(),
        }
    }

    /// Returns `true` if `key` may fire at `now`, and records it as fired
    pub fn check(&mut self, key: &K, now: DateTime<Local>) -> bool {
        match self.last_fired.get(key) {
            Some(last) if elapsed_between(*last, now) < self.window => false,
            _ => {
                self.last_fired.insert(key.clone(), now);
                true
            }
        }
    }

    /// Forget a key so its next request fires immediately
    pub fn reset(&mut self, key: &K) {
        self.last_fired.remove(key);
    }

    /// Drop entries that have been quiet for longer than `stale_after`
    pub fn cleanup(&mut self, now: DateTime<Local>, stale_after: Duration) {
        self.last_fired
            .retain(|_, last| elapsed_between(*last, now) < stale_after);
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 25, 14, 0, 0).unwrap()
    }

    fn after(base: DateTime<Local>, d: Duration) -> DateTime<Local> {
        crate::add_duration(base, d)
    }

    #[test]
    fn suppresses_within_window() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let start = t0();

        assert!(debouncer.check(&"app.x", start));
        assert!(!debouncer.check(&"app.x", after(start, Duration::from_millis(500))));
        assert!(!debouncer.check(&"app.x", after(start, Duration::from_millis(1999))));
        assert!(debouncer.check(&"app.x", after(start, Duration::from_secs(2))));
    }

    #[test]
    fn keys_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let start = t0();

        assert!(debouncer.check(&"app.x", start));
        assert!(debouncer.check(&"app.y", start));
        assert!(!debouncer.check(&"app.x", start));
    }

    #[test]
    fn reset_allows_immediate_fire() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let start = t0();

        assert!(debouncer.check(&"app.x", start));
        debouncer.reset(&"app.x");
        assert!(debouncer.check(&"app.x", start));
    }

    #[test]
    fn cleanup_drops_quiet_keys() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let start = t0();
        debouncer.check(&"app.x", start);

        debouncer.cleanup(after(start, Duration::from_secs(60)), Duration::from_secs(30));
        assert!(debouncer.last_fired.is_empty());
    }
}
