//! Scheduled effectuation of due asset transfers, coordinated across
//! worker processes.
//!
//! Every worker runs one [`EffectuationScheduler`] with the same cadence,
//! so all of them wake at (roughly) the same moment; the shared named lock
//! in [`crate::coordination`] decides which one actually does the work
//! that tick. Losers log a skip and go back to sleep.

mod handle;
mod job;
mod schedule;
mod scheduler;

pub use handle::{JobRunInfo, SchedulerHandle};
pub use job::{JobError, TriggerKind, TRANSFER_EFFECTUATION_JOB_ID};
pub use schedule::JobCadence;
pub use scheduler::{create_scheduler, EffectuationScheduler};
