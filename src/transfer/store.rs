use super::models::{AssetTransfer, TransferStatus};
use super::schema::TRANSFER_VERSIONED_SCHEMAS;
use super::TransferEffectuator;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteTransferStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTransferStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), TRANSFER_VERSIONED_SCHEMAS)
            .context("Failed to open transfers database")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record a new pending transfer request. Returns its id.
    pub fn create_transfer(
        &self,
        asset_id: &str,
        from_location: &str,
        to_location: &str,
        effective_date: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO asset_transfers
                 (asset_id, from_location, to_location, status, effective_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                asset_id,
                from_location,
                to_location,
                TransferStatus::Pending.as_str(),
                effective_date.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Move a transfer to a decided state (accepted / rejected / cancelled).
    pub fn set_transfer_status(
        &self,
        id: i64,
        status: TransferStatus,
        decided_by: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE asset_transfers SET status = ?2, decided_by = ?3 WHERE id = ?1",
            params![id, status.as_str(), decided_by],
        )?;
        if changed == 0 {
            anyhow::bail!("No transfer with id {}", id);
        }
        Ok(())
    }

    pub fn get_transfer(&self, id: i64) -> Result<Option<AssetTransfer>> {
        let conn = self.conn.lock().unwrap();
        let transfer = conn
            .query_row(
                "SELECT id, asset_id, from_location, to_location, status,
                        effective_date, decided_by, created_at, completed_at
                 FROM asset_transfers WHERE id = ?1",
                params![id],
                Self::row_to_transfer,
            )
            .optional()?;
        Ok(transfer)
    }

    pub fn list_transfers_by_status(
        &self,
        status: TransferStatus,
        limit: usize,
    ) -> Result<Vec<AssetTransfer>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, asset_id, from_location, to_location, status,
                    effective_date, decided_by, created_at, completed_at
             FROM asset_transfers
             WHERE status = ?1
             ORDER BY effective_date ASC
             LIMIT ?2",
        )?;
        let transfers = stmt
            .query_map(params![status.as_str(), limit], Self::row_to_transfer)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(transfers)
    }

    fn row_to_transfer(row: &rusqlite::Row) -> rusqlite::Result<AssetTransfer> {
        let status_str: String = row.get("status")?;
        let effective_date_str: String = row.get("effective_date")?;
        let created_at_str: String = row.get("created_at")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;

        Ok(AssetTransfer {
            id: row.get("id")?,
            asset_id: row.get("asset_id")?,
            from_location: row.get("from_location")?,
            to_location: row.get("to_location")?,
            status: parse_status(&status_str)?,
            effective_date: parse_timestamp(&effective_date_str)?,
            decided_by: row.get("decided_by")?,
            created_at: parse_timestamp(&created_at_str)?,
            completed_at: completed_at_str
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

// A row that fails to convert is corrupt data, not a default. Laundering
// a bad status into `pending` would make an already-completed transfer
// effectuatable again.
fn parse_status(s: &str) -> rusqlite::Result<TransferStatus> {
    TransferStatus::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("Unknown transfer status '{}'", s).into(),
        )
    })
}

fn parse_timestamp(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

impl TransferEffectuator for SqliteTransferStore {
    /// Complete every accepted transfer whose effective date has arrived.
    ///
    /// A single conditional UPDATE: only rows still in `accepted` change,
    /// which keeps a concurrent or repeated run from completing anything
    /// twice.
    fn effectuate_due_transfers(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let completed = conn.execute(
            "UPDATE asset_transfers
             SET status = ?1, completed_at = ?2
             WHERE status = ?3 AND effective_date <= ?2",
            params![
                TransferStatus::Completed.as_str(),
                now,
                TransferStatus::Accepted.as_str(),
            ],
        )?;
        if completed > 0 {
            info!("Effectuated {} due asset transfers", completed);
        }
        Ok(completed)
    }
}
