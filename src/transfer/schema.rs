//! Schema for the asset transfers database.

use crate::sqlite_persistence::{TableSpec, VersionedSchema};

const ASSET_TRANSFERS_TABLE_V1: TableSpec = TableSpec {
    name: "asset_transfers",
    create_sql: "CREATE TABLE asset_transfers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        asset_id TEXT NOT NULL,
        from_location TEXT NOT NULL,
        to_location TEXT NOT NULL,
        status TEXT NOT NULL,
        effective_date TEXT NOT NULL,
        decided_by TEXT,
        created_at TEXT NOT NULL,
        completed_at TEXT
    )",
    indices: &[
        "CREATE INDEX idx_transfers_status_effective ON asset_transfers(status, effective_date)",
        "CREATE INDEX idx_transfers_asset ON asset_transfers(asset_id)",
    ],
    columns: &[
        "id",
        "asset_id",
        "from_location",
        "to_location",
        "status",
        "effective_date",
        "decided_by",
        "created_at",
        "completed_at",
    ],
};

pub static TRANSFER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[ASSET_TRANSFERS_TABLE_V1],
    migration: None,
}];
