//! Schema for the server state database.

use crate::sqlite_persistence::{TableSpec, VersionedSchema};

/// History of background job executions.
const JOB_RUNS_TABLE_V1: TableSpec = TableSpec {
    name: "job_runs",
    create_sql: "CREATE TABLE job_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        status TEXT NOT NULL,
        processed INTEGER,
        error_message TEXT,
        triggered_by TEXT NOT NULL
    )",
    indices: &[
        "CREATE INDEX idx_job_runs_job_id_started ON job_runs(job_id, started_at DESC)",
        "CREATE INDEX idx_job_runs_status ON job_runs(status)",
    ],
    columns: &[
        "id",
        "job_id",
        "started_at",
        "finished_at",
        "status",
        "processed",
        "error_message",
        "triggered_by",
    ],
};

pub static SERVER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[JOB_RUNS_TABLE_V1],
    migration: None,
}];
