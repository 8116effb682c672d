//! Cross-process mutual exclusion for scheduled work.
//!
//! Every worker process behind the load balancer runs the same scheduler;
//! a named lock in the shared coordination database decides which one of
//! them actually performs a given tick's work. The lock is advisory and
//! TTL-bounded: a crashed holder blocks the cluster only until its row
//! expires.

mod coordinator;
mod lock_store;
mod schema;

pub use coordinator::LockCoordinator;
pub use lock_store::{LockStore, SqliteLockStore};

/// Lock name guarding transfer effectuation. Must stay globally unique
/// across every scheduled job in the deployment: a collision with another
/// job's lock name would serialize unrelated work.
pub const TRANSFER_EFFECTUATION_LOCK: &str = "asset_transfer_processing";
