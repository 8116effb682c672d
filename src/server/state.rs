use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::transfer::SqliteTransferStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedTransferStore = Arc<SqliteTransferStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub scheduler_handle: SchedulerHandle,
    pub transfer_store: GuardedTransferStore,
    pub hash: String,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for SchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

impl FromRef<ServerState> for GuardedTransferStore {
    fn from_ref(input: &ServerState) -> Self {
        input.transfer_store.clone()
    }
}
