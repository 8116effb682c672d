//! Asset transfer records and their effectuation.

mod models;
mod schema;
mod store;

pub use models::{AssetTransfer, TransferStatus};
pub use schema::TRANSFER_VERSIONED_SCHEMAS;
pub use store::SqliteTransferStore;

use anyhow::Result;

/// The unit of work the scheduled job protects.
///
/// Implementations complete every accepted transfer whose effective date
/// has arrived and report how many rows changed. The operation must be
/// idempotent: a transfer is only completed through its own status
/// transition, so running twice completes nothing the second time. That
/// idempotence is what lets the advisory lock get away without a fencing
/// token.
pub trait TransferEffectuator: Send + Sync {
    fn effectuate_due_transfers(&self) -> Result<usize>;
}
