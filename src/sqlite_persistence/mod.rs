//! Versioned SQLite schema management shared by the service's stores.
//!
//! Each database file carries its schema version in `PRAGMA user_version`,
//! offset by [`BASE_DB_VERSION`] so a plain SQLite file (user_version 0)
//! is never mistaken for one of ours. Fresh files are created at the
//! latest version; existing files are validated and migrated forward.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Offset added to schema versions before storing them in `user_version`.
pub const BASE_DB_VERSION: usize = 77_000;

/// Expected shape of one table, used for creation and validation.
pub struct TableSpec {
    pub name: &'static str,
    /// Full `CREATE TABLE` statement, indices included via [`TableSpec::indices`].
    pub create_sql: &'static str,
    /// `CREATE INDEX` statements, run after table creation.
    pub indices: &'static [&'static str],
    /// Column names in declaration order, checked against `PRAGMA table_info`.
    pub columns: &'static [&'static str],
}

/// One version of a database schema, with the migration that produces it
/// from the previous version. The first version has no migration.
pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [TableSpec],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    /// Create all tables of this version from scratch and stamp the version.
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for table in self.tables {
            conn.execute(table.create_sql, [])
                .with_context(|| format!("Failed to create table {}", table.name))?;
            for index_sql in table.indices {
                conn.execute(index_sql, [])?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Check that every table exists with the expected column names.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
            let actual_columns: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<rusqlite::Result<_>>()?;

            if actual_columns.is_empty() {
                bail!("Table {} is missing", table.name);
            }
            let matches = actual_columns.len() == table.columns.len()
                && actual_columns
                    .iter()
                    .map(String::as_str)
                    .eq(table.columns.iter().copied());
            if !matches {
                bail!(
                    "Table {} has columns [{}], expected [{}]",
                    table.name,
                    actual_columns.join(", "),
                    table.columns.join(", ")
                );
            }
        }
        Ok(())
    }
}

/// Open a database file against a set of versioned schemas.
///
/// New files are created at the latest version. Existing files must carry a
/// known version; their schema is validated and pending migrations are run
/// inside one transaction.
pub fn open_versioned(path: &Path, schemas: &'static [VersionedSchema]) -> Result<Connection> {
    let is_new_db = !path.exists();
    let latest = schemas
        .last()
        .context("Schema list must not be empty")?;

    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {:?}", path))?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;

    if is_new_db {
        info!("Creating new database at {:?}", path);
        latest.create(&conn)?;
        return Ok(conn);
    }

    let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let db_version = raw_version - BASE_DB_VERSION as i64;
    if db_version < 1 {
        bail!(
            "Database {:?} has version {} which is not one of ours",
            path,
            raw_version
        );
    }

    let known = schemas
        .iter()
        .find(|s| s.version == db_version as usize)
        .with_context(|| format!("Unknown schema version {} in {:?}", db_version, path))?;
    known
        .validate(&conn)
        .with_context(|| format!("Schema validation failed for {:?}", path))?;

    if (db_version as usize) < latest.version {
        info!(
            "Migrating {:?} from version {} to {}",
            path, db_version, latest.version
        );
        migrate(&mut conn, schemas, db_version as usize)?;
    }

    Ok(conn)
}

fn migrate(
    conn: &mut Connection,
    schemas: &'static [VersionedSchema],
    from_version: usize,
) -> Result<()> {
    let tx = conn.transaction()?;
    let mut reached = from_version;
    for schema in schemas.iter().filter(|s| s.version > from_version) {
        if let Some(migration_fn) = schema.migration {
            migration_fn(&tx)
                .with_context(|| format!("Failed migration to version {}", schema.version))?;
        }
        reached = schema.version;
    }
    tx.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + reached),
        [],
    )?;
    tx.commit()?;
    Ok(())
}
