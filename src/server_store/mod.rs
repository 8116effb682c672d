mod models;
mod schema;
mod sqlite_server_store;

pub use models::{JobRun, JobRunStatus};
pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;

/// Persistence for background job run history.
pub trait ServerStore: Send + Sync {
    /// Record the start of a run. Returns the run id to finish it with.
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        processed: Option<i64>,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    /// Mark runs still `running` as failed. Called on startup, where any
    /// such row can only be a leftover from a crash.
    fn mark_stale_jobs_failed(&self) -> Result<usize>;
}
