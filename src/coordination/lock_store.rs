use super::schema::COORDINATION_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Atomic named-lock primitive hosted by a store shared between all
/// worker processes.
///
/// Both operations must be atomic with respect to concurrent callers on
/// other processes. Contention is expressed through the return value;
/// an `Err` always means the store itself misbehaved.
pub trait LockStore: Send + Sync {
    /// Attempt to take the named lock for `holder`, without blocking.
    ///
    /// Succeeds when the lock is free, expired, or already held by this
    /// same holder (in which case the TTL is refreshed). Returns `false`
    /// when a different holder has an unexpired claim.
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release the named lock if (and only if) `holder` currently holds it.
    ///
    /// Returns `true` when a row was actually deleted. Releasing a lock
    /// held by someone else, or not held at all, is a no-op returning
    /// `false` — never an error.
    fn release(&self, name: &str, holder: &str) -> Result<bool>;
}

/// [`LockStore`] backed by the shared SQLite coordination database.
///
/// SQLite serializes writers per database file, so the single conditional
/// UPSERT below is atomic across every process that opens the same file.
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), COORDINATION_VERSIONED_SCHEMAS)
            .context("Failed to open coordination database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl LockStore for SqliteLockStore {
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp();
        let expires_at = now + ttl.as_secs() as i64;

        let conn = self.conn.lock().unwrap();
        // Insert wins when the lock is free; the conflict branch steals the
        // row only from an expired holder (or refreshes our own claim).
        let changed = conn.execute(
            "INSERT INTO named_locks (name, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 holder = excluded.holder,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE named_locks.expires_at <= ?3 OR named_locks.holder = excluded.holder",
            params![name, holder, now, expires_at],
        )?;
        Ok(changed > 0)
    }

    fn release(&self, name: &str, holder: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM named_locks WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(deleted > 0)
    }
}
