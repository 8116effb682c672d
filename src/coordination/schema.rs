//! Schema for the shared coordination database.

use crate::sqlite_persistence::{TableSpec, VersionedSchema};

/// Named advisory locks. One row per held lock; absence means free.
/// `expires_at` is a unix timestamp after which any process may take over.
const NAMED_LOCKS_TABLE_V1: TableSpec = TableSpec {
    name: "named_locks",
    create_sql: "CREATE TABLE named_locks (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    indices: &["CREATE INDEX idx_named_locks_expires ON named_locks(expires_at)"],
    columns: &["name", "holder", "acquired_at", "expires_at"],
};

pub static COORDINATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[NAMED_LOCKS_TABLE_V1],
    migration: None,
}];
