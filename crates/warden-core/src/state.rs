//! Typed view over the durable store
//!
//! Every record is one JSON value under one key, replaced whole on write.
//! A value that fails to parse is treated as absent and reported as a
//! data-integrity event; enforcement fails open rather than blocking the
//! device on bad data.

use chrono::{DateTime, Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use warden_api::{HeartbeatRecord, LoopName};
use warden_store::{AuditEvent, AuditEventType, KvAccess, Store, StoreResult};
use warden_util::{elapsed_between, AppId};

pub const KEY_LIMITS: &str = "limits";
pub const KEY_USAGE: &str = "usage";
pub const KEY_USAGE_DAY: &str = "usage_day";
pub const KEY_USAGE_RESET_AT: &str = "usage_reset_at";
pub const KEY_AUTO_RESTART: &str = "auto_restart_enabled";
pub const KEY_GRANT_NEEDED: &str = "grant_needed";
pub const KEY_GRANT_PROMPTED_AT: &str = "grant_prompted_at";
pub const KEY_LOOP_DEAD_NOTIFIED_AT: &str = "loop_dead_notified_at";
pub const KEY_GUARANTEED_CHECK_DUE_AT: &str = "guaranteed_check_due_at";
pub const LOCKED_PREFIX: &str = "locked.";
pub const UNLOCK_OVERRIDE_PREFIX: &str = "unlock_override.";
pub const HEARTBEAT_PREFIX: &str = "heartbeat.";

/// Daily limits in minutes; zero or absent means unlimited
pub type LimitTable = BTreeMap<AppId, u64>;

/// Accumulated usage in milliseconds
pub type UsageTable = BTreeMap<AppId, u64>;

/// Parse a record read inside a transaction; audits are deferred until it ends
fn decode<T: DeserializeOwned>(
    kv: &dyn KvAccess,
    key: &str,
    corrupted: &mut Vec<AuditEventType>,
) -> StoreResult<Option<T>> {
    let Some(raw) = kv.get(key)? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "Corrupted record, treating as empty");
            corrupted.push(AuditEventType::DataIntegrity {
                key: key.to_string(),
                message: e.to_string(),
            });
            Ok(None)
        }
    }
}

/// Durable lock flags, limits, usage, heartbeats and supervisor flags
#[derive(Clone)]
pub struct LockStateStore {
    store: Arc<dyn Store>,
}

impl LockStateStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Corrupted record, treating as empty");
                self.audit(AuditEventType::DataIntegrity {
                    key: key.to_string(),
                    message: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json)
    }

    fn apps_with_prefix(&self, prefix: &str) -> StoreResult<Vec<AppId>> {
        Ok(self
            .store
            .keys_with_prefix(prefix)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix).map(AppId::new))
            .collect())
    }

    // Limits

    pub fn limits(&self) -> StoreResult<LimitTable> {
        Ok(self.read(KEY_LIMITS)?.unwrap_or_default())
    }

    pub fn set_limits(&self, limits: &LimitTable) -> StoreResult<()> {
        self.write(KEY_LIMITS, limits)
    }

    /// Limit of one app, `None` when unlimited
    pub fn limit_for(&self, app: &AppId) -> StoreResult<Option<Duration>> {
        Ok(self
            .limits()?
            .get(app)
            .copied()
            .filter(|m| *m > 0)
            .map(warden_util::minutes))
    }

    // Usage

    pub fn usage(&self) -> StoreResult<UsageTable> {
        Ok(self.read(KEY_USAGE)?.unwrap_or_default())
    }

    pub fn set_usage(&self, usage: &UsageTable) -> StoreResult<()> {
        self.write(KEY_USAGE, usage)
    }

    pub fn usage_of(&self, app: &AppId) -> StoreResult<Duration> {
        Ok(Duration::from_millis(
            self.usage()?.get(app).copied().unwrap_or(0),
        ))
    }

    /// Credit the span `start..end` to an app, minus anything before the last reset
    ///
    /// The reset instant and the usage table are read and the new total
    /// written in one transaction, so a reset from another process is never
    /// overwritten. Returns the credited span and the app's new total in ms.
    pub fn credit_usage(
        &self,
        app: &AppId,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> StoreResult<(Duration, u64)> {
        let mut credited = (Duration::ZERO, 0);
        let mut corrupted = Vec::new();

        self.store.transaction(&mut |kv: &dyn KvAccess| {
            corrupted.clear();
            let reset_at: Option<DateTime<Local>> =
                decode(kv, KEY_USAGE_RESET_AT, &mut corrupted)?;
            let start = match reset_at {
                Some(reset_at) if reset_at > start => reset_at,
                _ => start,
            };

            let delta = elapsed_between(start, end);
            if delta.is_zero() {
                credited = (Duration::ZERO, 0);
                return Ok(());
            }

            let mut usage: UsageTable = decode(kv, KEY_USAGE, &mut corrupted)?.unwrap_or_default();
            let total = usage.entry(app.clone()).or_insert(0);
            *total = total.saturating_add(delta.as_millis() as u64);
            credited = (delta, *total);

            kv.set(KEY_USAGE, &serde_json::to_string(&usage)?)
        })?;

        for event in corrupted {
            self.audit(event);
        }
        Ok(credited)
    }

    /// Zero every usage counter and record the reset instant together
    pub fn reset_usage(&self, at: DateTime<Local>) -> StoreResult<()> {
        self.store.transaction(&mut |kv: &dyn KvAccess| {
            kv.set(KEY_USAGE, &serde_json::to_string(&UsageTable::new())?)?;
            kv.set(KEY_USAGE_RESET_AT, &serde_json::to_string(&at)?)
        })
    }

    pub fn usage_day(&self) -> StoreResult<Option<NaiveDate>> {
        let key: Option<String> = self.read(KEY_USAGE_DAY)?;
        Ok(key.and_then(|k| warden_util::parse_day_key(&k)))
    }

    pub fn set_usage_day(&self, day: NaiveDate) -> StoreResult<()> {
        self.write(KEY_USAGE_DAY, &warden_util::day_key(day))
    }

    pub fn usage_reset_at(&self) -> StoreResult<Option<DateTime<Local>>> {
        self.read(KEY_USAGE_RESET_AT)
    }

    // Lock flags

    pub fn is_locked(&self, app: &AppId) -> StoreResult<bool> {
        Ok(self
            .read(&format!("{}{}", LOCKED_PREFIX, app))?
            .unwrap_or(false))
    }

    pub fn set_locked(&self, app: &AppId, locked: bool) -> StoreResult<()> {
        self.write(&format!("{}{}", LOCKED_PREFIX, app), &locked)
    }

    /// Apps whose lock flag is currently set
    pub fn locked_apps(&self) -> StoreResult<Vec<AppId>> {
        let mut locked = Vec::new();
        for app in self.apps_with_prefix(LOCKED_PREFIX)? {
            if self.is_locked(&app)? {
                locked.push(app);
            }
        }
        Ok(locked)
    }

    pub fn unlock_override(&self, app: &AppId) -> StoreResult<bool> {
        Ok(self
            .read(&format!("{}{}", UNLOCK_OVERRIDE_PREFIX, app))?
            .unwrap_or(false))
    }

    pub fn set_unlock_override(&self, app: &AppId, overridden: bool) -> StoreResult<()> {
        self.write(&format!("{}{}", UNLOCK_OVERRIDE_PREFIX, app), &overridden)
    }

    /// Every app with a limit, usage or lock record
    pub fn known_apps(&self) -> StoreResult<BTreeSet<AppId>> {
        let mut apps: BTreeSet<AppId> = self.limits()?.into_keys().collect();
        apps.extend(self.usage()?.into_keys());
        apps.extend(self.apps_with_prefix(LOCKED_PREFIX)?);
        Ok(apps)
    }

    // Heartbeats

    pub fn heartbeat(&self, loop_name: LoopName) -> StoreResult<Option<HeartbeatRecord>> {
        self.read(&format!("{}{}", HEARTBEAT_PREFIX, loop_name))
    }

    pub fn set_heartbeat(&self, loop_name: LoopName, record: &HeartbeatRecord) -> StoreResult<()> {
        self.write(&format!("{}{}", HEARTBEAT_PREFIX, loop_name), record)
    }

    // Supervisor flags

    /// Persisted auto-restart flag, `None` until first written
    pub fn auto_restart_enabled(&self) -> StoreResult<Option<bool>> {
        self.read(KEY_AUTO_RESTART)
    }

    pub fn set_auto_restart_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.write(KEY_AUTO_RESTART, &enabled)
    }

    pub fn grant_needed(&self) -> StoreResult<bool> {
        Ok(self.read(KEY_GRANT_NEEDED)?.unwrap_or(false))
    }

    pub fn set_grant_needed(&self, needed: bool) -> StoreResult<()> {
        self.write(KEY_GRANT_NEEDED, &needed)
    }

    pub fn grant_prompted_at(&self) -> StoreResult<Option<DateTime<Local>>> {
        self.read(KEY_GRANT_PROMPTED_AT)
    }

    pub fn set_grant_prompted_at(&self, at: DateTime<Local>) -> StoreResult<()> {
        self.write(KEY_GRANT_PROMPTED_AT, &at)
    }

    pub fn loop_dead_notified_at(&self) -> StoreResult<Option<DateTime<Local>>> {
        self.read(KEY_LOOP_DEAD_NOTIFIED_AT)
    }

    pub fn set_loop_dead_notified_at(&self, at: DateTime<Local>) -> StoreResult<()> {
        self.write(KEY_LOOP_DEAD_NOTIFIED_AT, &at)
    }

    /// When the pending out-of-process watchdog check is due
    pub fn guaranteed_check_due_at(&self) -> StoreResult<Option<DateTime<Local>>> {
        self.read(KEY_GUARANTEED_CHECK_DUE_AT)
    }

    pub fn set_guaranteed_check_due_at(&self, at: DateTime<Local>) -> StoreResult<()> {
        self.write(KEY_GUARANTEED_CHECK_DUE_AT, &at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_store::SqliteStore;

    fn make_state() -> LockStateStore {
        LockStateStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn empty_store_reads_defaults() {
        let state = make_state();
        let app = AppId::new("app.x");

        assert!(state.limits().unwrap().is_empty());
        assert_eq!(state.usage_of(&app).unwrap(), Duration::ZERO);
        assert!(!state.is_locked(&app).unwrap());
        assert!(!state.unlock_override(&app).unwrap());
        assert_eq!(state.heartbeat(LoopName::Enforcement).unwrap(), None);
        assert_eq!(state.auto_restart_enabled().unwrap(), None);
    }

    #[test]
    fn lock_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = warden_util::db_path_in(dir.path());
        let app = AppId::new("app.x");

        {
            let state = LockStateStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
            state.set_locked(&app, true).unwrap();
            state
                .set_usage(&UsageTable::from([(app.clone(), 600_000)]))
                .unwrap();
        }

        let state = LockStateStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
        assert!(state.is_locked(&app).unwrap());
        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(600));
        assert_eq!(state.locked_apps().unwrap(), vec![app]);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let state = make_state();
        let mut limits = LimitTable::new();
        limits.insert(AppId::new("app.x"), 10);
        limits.insert(AppId::new("app.y"), 0);
        state.set_limits(&limits).unwrap();

        assert_eq!(
            state.limit_for(&AppId::new("app.x")).unwrap(),
            Some(Duration::from_secs(600))
        );
        assert_eq!(state.limit_for(&AppId::new("app.y")).unwrap(), None);
        assert_eq!(state.limit_for(&AppId::new("app.z")).unwrap(), None);
    }

    #[test]
    fn corrupted_usage_reads_as_empty_and_is_audited() {
        let state = make_state();
        state.store().set(KEY_USAGE, "{not json").unwrap();

        assert!(state.usage().unwrap().is_empty());

        let audits = state.store().recent_audits(10).unwrap();
        assert!(matches!(
            &audits[0].event,
            AuditEventType::DataIntegrity { key, .. } if key == KEY_USAGE
        ));
    }

    #[test]
    fn credit_after_reset_from_other_handle_counts_from_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = warden_util::db_path_in(dir.path());
        let app = AppId::new("app.x");
        let start = warden_util::now();

        let daemon = LockStateStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
        let cli = LockStateStore::new(Arc::new(SqliteStore::open(&path).unwrap()));

        daemon
            .credit_usage(&app, start, start + chrono::Duration::seconds(300))
            .unwrap();
        cli.reset_usage(start + chrono::Duration::seconds(400)).unwrap();

        let later = |secs| start + chrono::Duration::seconds(secs);
        let (credited, total_ms) = daemon.credit_usage(&app, later(300), later(420)).unwrap();

        assert_eq!(credited, Duration::from_secs(20));
        assert_eq!(total_ms, 20_000);
        assert_eq!(cli.usage_of(&app).unwrap(), Duration::from_secs(20));
        assert_eq!(
            cli.usage_reset_at().unwrap(),
            Some(start + chrono::Duration::seconds(400))
        );
    }

    #[test]
    fn credit_over_corrupted_usage_starts_fresh_and_audits() {
        let state = make_state();
        let app = AppId::new("app.x");
        let start = warden_util::now();
        state.store().set(KEY_USAGE, "{not json").unwrap();

        state
            .credit_usage(&app, start, start + chrono::Duration::seconds(60))
            .unwrap();

        assert_eq!(state.usage_of(&app).unwrap(), Duration::from_secs(60));
        let audits = state.store().recent_audits(10).unwrap();
        assert!(matches!(
            &audits[0].event,
            AuditEventType::DataIntegrity { key, .. } if key == KEY_USAGE
        ));
    }

    #[test]
    fn corrupted_lock_flag_fails_open() {
        let state = make_state();
        let app = AppId::new("app.x");
        state.store().set("locked.app.x", "\"yes\"").unwrap();

        assert!(!state.is_locked(&app).unwrap());
    }

    #[test]
    fn locked_apps_lists_only_set_flags() {
        let state = make_state();
        state.set_locked(&AppId::new("app.x"), true).unwrap();
        state.set_locked(&AppId::new("app.y"), false).unwrap();

        assert_eq!(state.locked_apps().unwrap(), vec![AppId::new("app.x")]);
    }

    #[test]
    fn known_apps_unions_records() {
        let state = make_state();
        let mut limits = LimitTable::new();
        limits.insert(AppId::new("app.a"), 5);
        state.set_limits(&limits).unwrap();
        let mut usage = UsageTable::new();
        usage.insert(AppId::new("app.b"), 1000);
        state.set_usage(&usage).unwrap();
        state.set_locked(&AppId::new("app.c"), false).unwrap();

        let apps: Vec<_> = state.known_apps().unwrap().into_iter().collect();
        assert_eq!(
            apps,
            vec![AppId::new("app.a"), AppId::new("app.b"), AppId::new("app.c")]
        );
    }

    #[test]
    fn heartbeat_round_trip() {
        let state = make_state();
        let record = HeartbeatRecord::beat(warden_util::now());
        state.set_heartbeat(LoopName::Watchdog, &record).unwrap();

        assert_eq!(state.heartbeat(LoopName::Watchdog).unwrap(), Some(record));
        assert_eq!(state.heartbeat(LoopName::Enforcement).unwrap(), None);
    }

    #[test]
    fn usage_day_round_trip() {
        let state = make_state();
        let day = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        state.set_usage_day(day).unwrap();
        assert_eq!(state.usage_day().unwrap(), Some(day));
    }
}
