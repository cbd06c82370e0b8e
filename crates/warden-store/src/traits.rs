//! Store trait definitions

use crate::{AuditEvent, StoreResult};

/// Key/value access inside a [`Store::transaction`]
pub trait KvAccess {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Durable key/value store shared by every loop and by the command-line tools
///
/// Values are opaque strings (JSON in practice). Every `set` replaces the
/// whole value; there is no partial update and no expiry.
pub trait Store: Send + Sync {
    /// Read a value, `None` if the key was never written
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Overwrite a value
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Run `body` as one read-modify-write unit
    ///
    /// Writers in other processes wait until the transaction ends. Nothing
    /// is committed if `body` fails. `body` must not call back into the
    /// same store.
    fn transaction(&self, body: &mut dyn FnMut(&dyn KvAccess) -> StoreResult<()>) -> StoreResult<()>;

    /// All keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
