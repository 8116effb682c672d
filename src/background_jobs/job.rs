use thiserror::Error;

/// Job id under which effectuation runs are recorded.
pub const TRANSFER_EFFECTUATION_JOB_ID: &str = "transfer_effectuation";

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "schedule",
            TriggerKind::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ways a run can fail.
///
/// Contention is the expected case when another worker won the tick; it
/// is only an error on the manual path, where a caller is waiting for an
/// answer. The scheduled path downgrades it to a logged skip.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Lock not acquired: another instance is processing transfers")]
    LockContention,
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Scheduler is not available")]
    SchedulerUnavailable,
}
