use super::job::{JobError, TRANSFER_EFFECTUATION_JOB_ID};
use crate::server_store::{JobRun, ServerStore};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Command sent to the scheduler loop.
pub(super) enum SchedulerCommand {
    TriggerEffectuation {
        response: oneshot::Sender<Result<usize, JobError>>,
    },
}

/// Serializable job run information for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            processed: run.processed,
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

/// Handle for HTTP handlers to interact with the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub(super) fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            server_store,
        }
    }

    /// Run transfer effectuation now, going through the same lock protocol
    /// as a scheduled tick. Returns the processed count, or the error the
    /// run ended with — including lock contention, which the caller must
    /// see rather than have silently swallowed.
    pub async fn trigger_effectuation(&self) -> Result<usize, JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerEffectuation {
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::SchedulerUnavailable)?;

        response_rx
            .await
            .map_err(|_| JobError::SchedulerUnavailable)?
    }

    pub fn get_run_history(&self, limit: usize) -> Result<Vec<JobRunInfo>> {
        let history = self
            .server_store
            .get_job_history(TRANSFER_EFFECTUATION_JOB_ID, limit)?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    pub fn get_last_run(&self) -> Result<Option<JobRunInfo>> {
        let run = self
            .server_store
            .get_last_run(TRANSFER_EFFECTUATION_JOB_ID)?;
        Ok(run.map(JobRunInfo::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_store::JobRunStatus;
    use chrono::Utc;

    #[test]
    fn run_info_from_completed_run() {
        let now = Utc::now();
        let run = JobRun {
            id: 1,
            job_id: TRANSFER_EFFECTUATION_JOB_ID.to_string(),
            started_at: now,
            finished_at: Some(now + chrono::Duration::seconds(4)),
            status: JobRunStatus::Completed,
            processed: Some(12),
            error_message: None,
            triggered_by: "schedule".to_string(),
        };

        let info = JobRunInfo::from(run);
        assert_eq!(info.status, "completed");
        assert_eq!(info.processed, Some(12));
        assert!(info.finished_at.is_some());
        // RFC3339 timestamps for API consumers.
        assert!(info.started_at.contains('T'));
    }

    #[test]
    fn run_info_from_failed_run() {
        let run = JobRun {
            id: 2,
            job_id: TRANSFER_EFFECTUATION_JOB_ID.to_string(),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            status: JobRunStatus::Failed,
            processed: None,
            error_message: Some("DB timeout".to_string()),
            triggered_by: "manual".to_string(),
        };

        let info = JobRunInfo::from(run);
        assert_eq!(info.status, "failed");
        assert!(info.processed.is_none());
        assert_eq!(info.error_message.as_deref(), Some("DB timeout"));
        assert_eq!(info.triggered_by, "manual");
    }
}
