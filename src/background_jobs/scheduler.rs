use super::handle::{SchedulerHandle, SchedulerCommand};
use super::job::{JobError, TriggerKind, TRANSFER_EFFECTUATION_JOB_ID};
use super::schedule::JobCadence;
use crate::coordination::{LockCoordinator, TRANSFER_EFFECTUATION_LOCK};
use crate::server::metrics;
use crate::server_store::{JobRunStatus, ServerStore};
use crate::transfer::TransferEffectuator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One acquire → effectuate → release cycle, shared by scheduled ticks and
/// manual triggers.
struct EffectuationRunner {
    coordinator: LockCoordinator,
    effectuator: Arc<dyn TransferEffectuator>,
    server_store: Arc<dyn ServerStore>,
    lock_timeout: Duration,
}

impl EffectuationRunner {
    /// Run the protected work once.
    ///
    /// Holds the cluster lock for the duration of the effectuation call
    /// and releases it on every exit path past acquisition — effectuator
    /// error and panic included. Contention comes back as
    /// [`JobError::LockContention`] without the effectuator ever running.
    async fn run(&self, trigger: TriggerKind) -> Result<usize, JobError> {
        let started = Instant::now();

        if !self
            .coordinator
            .acquire(TRANSFER_EFFECTUATION_LOCK, self.lock_timeout)
            .await
        {
            metrics::record_job_run(
                TRANSFER_EFFECTUATION_JOB_ID,
                trigger.as_str(),
                "skipped",
                started.elapsed(),
            );
            return Err(JobError::LockContention);
        }

        let run_id = match self
            .server_store
            .record_job_start(TRANSFER_EFFECTUATION_JOB_ID, trigger.as_str())
        {
            Ok(id) => Some(id),
            Err(e) => {
                // History is observability, not a precondition for the work.
                error!("Failed to record job start: {:#}", e);
                None
            }
        };

        let effectuator = Arc::clone(&self.effectuator);
        let result =
            tokio::task::spawn_blocking(move || effectuator.effectuate_due_transfers()).await;

        // Release before interpreting the result so no outcome path can
        // leave the lock held.
        self.coordinator.release(TRANSFER_EFFECTUATION_LOCK).await;

        let elapsed = started.elapsed();
        let outcome = match result {
            Ok(Ok(processed)) => Ok(processed),
            Ok(Err(e)) => Err(JobError::ExecutionFailed(format!("{:#}", e))),
            Err(e) => Err(JobError::ExecutionFailed(format!("Task panic: {}", e))),
        };

        match &outcome {
            Ok(processed) => {
                info!(
                    "Transfer effectuation ({}) completed in {:?}: {} transfers processed",
                    trigger, elapsed, processed
                );
                metrics::record_job_run(
                    TRANSFER_EFFECTUATION_JOB_ID,
                    trigger.as_str(),
                    "success",
                    elapsed,
                );
                metrics::set_job_last_processed(TRANSFER_EFFECTUATION_JOB_ID, *processed);
                self.record_finish(run_id, JobRunStatus::Completed, Some(*processed as i64), None);
            }
            Err(e) => {
                error!(
                    "Transfer effectuation ({}) failed after {:?}: {}",
                    trigger, elapsed, e
                );
                metrics::record_job_run(
                    TRANSFER_EFFECTUATION_JOB_ID,
                    trigger.as_str(),
                    "failed",
                    elapsed,
                );
                self.record_finish(run_id, JobRunStatus::Failed, None, Some(e.to_string()));
            }
        }

        outcome
    }

    fn record_finish(
        &self,
        run_id: Option<i64>,
        status: JobRunStatus,
        processed: Option<i64>,
        error_message: Option<String>,
    ) {
        let Some(run_id) = run_id else { return };
        if let Err(e) = self
            .server_store
            .record_job_finish(run_id, status, processed, error_message)
        {
            error!("Failed to record job finish: {:#}", e);
        }
    }
}

/// Per-process scheduler for the transfer effectuation job.
///
/// Owns the timer: constructed, started via [`EffectuationScheduler::run`],
/// and stopped through its cancellation token, so shutdown cleanly cancels
/// any pending tick.
pub struct EffectuationScheduler {
    runner: Arc<EffectuationRunner>,
    cadence: JobCadence,
    command_receiver: mpsc::Receiver<SchedulerCommand>,
    shutdown_token: CancellationToken,
}

impl EffectuationScheduler {
    /// Main scheduler loop. Returns when the shutdown token fires.
    pub async fn run(&mut self) {
        info!(
            "Starting effectuation scheduler (cadence '{}', holder {})",
            self.cadence,
            self.runner.coordinator.holder_id()
        );

        // Leftover `running` rows can only come from a crashed process.
        match self.runner.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale job runs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => error!("Failed to mark stale job runs: {:#}", e),
        }

        loop {
            let sleep_duration = self.cadence.until_next_fire(chrono::Utc::now());
            debug!("Scheduler sleeping {:?} until next tick", sleep_duration);

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.scheduled_tick().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd);
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Effectuation scheduler stopped");
    }

    /// One timer tick. Nothing here may escape: a contention skip is
    /// routine, any failure is terminal to this tick only, and the next
    /// fire retries whatever work is still due.
    async fn scheduled_tick(&self) {
        match self.runner.run(TriggerKind::Scheduled).await {
            Ok(_) => {}
            Err(JobError::LockContention) => {
                info!("Skipping tick: another instance is processing transfers");
            }
            Err(_) => {
                // Already logged with detail by the runner.
            }
        }
    }

    fn handle_command(&self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerEffectuation { response } => {
                // Run off the loop so a slow manual run cannot delay the
                // timer; it contends on the lock like anyone else.
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move {
                    let _ = response.send(runner.run(TriggerKind::Manual).await);
                });
            }
        }
    }
}

/// Create a scheduler and the handle for interacting with it.
pub fn create_scheduler(
    coordinator: LockCoordinator,
    effectuator: Arc<dyn TransferEffectuator>,
    server_store: Arc<dyn ServerStore>,
    cadence: JobCadence,
    lock_timeout: Duration,
    shutdown_token: CancellationToken,
) -> (EffectuationScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);

    let runner = Arc::new(EffectuationRunner {
        coordinator,
        effectuator,
        server_store: Arc::clone(&server_store),
        lock_timeout,
    });

    let scheduler = EffectuationScheduler {
        runner,
        cadence,
        command_receiver: command_rx,
        shutdown_token,
    };
    let handle = SchedulerHandle::new(command_tx, server_store);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{LockStore, SqliteLockStore};
    use crate::server_store::SqliteServerStore;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const LOCK_TIMEOUT: Duration = Duration::from_millis(100);

    struct CountingEffectuator {
        executions: AtomicUsize,
        should_fail: AtomicBool,
        should_panic: AtomicBool,
        processed_per_run: usize,
    }

    impl CountingEffectuator {
        fn new(processed_per_run: usize) -> Arc<Self> {
            Arc::new(Self {
                executions: AtomicUsize::new(0),
                should_fail: AtomicBool::new(false),
                should_panic: AtomicBool::new(false),
                processed_per_run,
            })
        }

        fn executions(&self) -> usize {
            self.executions.load(Ordering::SeqCst)
        }
    }

    impl TransferEffectuator for CountingEffectuator {
        fn effectuate_due_transfers(&self) -> Result<usize> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.should_panic.load(Ordering::SeqCst) {
                panic!("effectuator blew up");
            }
            if self.should_fail.load(Ordering::SeqCst) {
                return Err(anyhow!("DB timeout"));
            }
            Ok(self.processed_per_run)
        }
    }

    struct TestRig {
        scheduler: EffectuationScheduler,
        handle: SchedulerHandle,
        effectuator: Arc<CountingEffectuator>,
        lock_store: Arc<SqliteLockStore>,
        server_store: Arc<SqliteServerStore>,
        shutdown_token: CancellationToken,
        _temp_dir: TempDir,
    }

    fn make_rig(processed_per_run: usize) -> TestRig {
        let temp_dir = TempDir::new().unwrap();
        let lock_store =
            Arc::new(SqliteLockStore::new(temp_dir.path().join("coordination.db")).unwrap());
        let server_store =
            Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        let effectuator = CountingEffectuator::new(processed_per_run);
        let shutdown_token = CancellationToken::new();

        let coordinator = LockCoordinator::new(lock_store.clone() as Arc<dyn LockStore>)
            .with_poll_interval(Duration::from_millis(10));

        // 03:00 daily keeps the timer quiet for the duration of any test.
        let (scheduler, handle) = create_scheduler(
            coordinator,
            effectuator.clone() as Arc<dyn TransferEffectuator>,
            server_store.clone() as Arc<dyn ServerStore>,
            JobCadence::parse("0 3 * * *").unwrap(),
            LOCK_TIMEOUT,
            shutdown_token.clone(),
        );

        TestRig {
            scheduler,
            handle,
            effectuator,
            lock_store,
            server_store,
            shutdown_token,
            _temp_dir: temp_dir,
        }
    }

    fn spawn_scheduler(mut scheduler: EffectuationScheduler) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { scheduler.run().await })
    }

    #[tokio::test]
    async fn manual_trigger_reports_processed_count() {
        let rig = make_rig(7);
        let scheduler_task = spawn_scheduler(rig.scheduler);

        let processed = rig.handle.trigger_effectuation().await.unwrap();
        assert_eq!(processed, 7);
        assert_eq!(rig.effectuator.executions(), 1);

        let last = rig.handle.get_last_run().unwrap().unwrap();
        assert_eq!(last.status, "completed");
        assert_eq!(last.processed, Some(7));
        assert_eq!(last.triggered_by, "manual");

        rig.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_task).await;
    }

    #[tokio::test]
    async fn manual_trigger_fails_fast_when_lock_held_elsewhere() {
        let rig = make_rig(1);
        let scheduler_task = spawn_scheduler(rig.scheduler);

        // Simulate another worker holding the cluster lock.
        assert!(rig
            .lock_store
            .try_acquire(
                TRANSFER_EFFECTUATION_LOCK,
                "other-worker",
                Duration::from_secs(60)
            )
            .unwrap());

        let result = rig.handle.trigger_effectuation().await;
        assert!(matches!(result, Err(JobError::LockContention)));
        // The effectuator never ran, so nothing can have been double-counted.
        assert_eq!(rig.effectuator.executions(), 0);
        assert!(rig.handle.get_last_run().unwrap().is_none());

        rig.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_task).await;
    }

    #[tokio::test]
    async fn manual_trigger_succeeds_after_other_holder_releases() {
        let rig = make_rig(2);
        let scheduler_task = spawn_scheduler(rig.scheduler);

        assert!(rig
            .lock_store
            .try_acquire(
                TRANSFER_EFFECTUATION_LOCK,
                "other-worker",
                Duration::from_secs(60)
            )
            .unwrap());
        assert!(matches!(
            rig.handle.trigger_effectuation().await,
            Err(JobError::LockContention)
        ));

        rig.lock_store
            .release(TRANSFER_EFFECTUATION_LOCK, "other-worker")
            .unwrap();
        assert_eq!(rig.handle.trigger_effectuation().await.unwrap(), 2);

        rig.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_task).await;
    }

    #[tokio::test]
    async fn effectuator_failure_still_releases_lock() {
        let rig = make_rig(1);
        let scheduler_task = spawn_scheduler(rig.scheduler);

        rig.effectuator.should_fail.store(true, Ordering::SeqCst);
        let result = rig.handle.trigger_effectuation().await;
        match result {
            Err(JobError::ExecutionFailed(msg)) => assert!(msg.contains("DB timeout")),
            other => panic!("Expected ExecutionFailed, got {:?}", other),
        }

        let failed = rig.handle.get_last_run().unwrap().unwrap();
        assert_eq!(failed.status, "failed");
        assert!(failed.error_message.unwrap().contains("DB timeout"));

        // Lock was released despite the failure: the next run proceeds.
        rig.effectuator.should_fail.store(false, Ordering::SeqCst);
        assert_eq!(rig.handle.trigger_effectuation().await.unwrap(), 1);
        assert_eq!(rig.effectuator.executions(), 2);

        rig.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_task).await;
    }

    #[tokio::test]
    async fn effectuator_panic_still_releases_lock() {
        let rig = make_rig(1);
        let scheduler_task = spawn_scheduler(rig.scheduler);

        rig.effectuator.should_panic.store(true, Ordering::SeqCst);
        assert!(matches!(
            rig.handle.trigger_effectuation().await,
            Err(JobError::ExecutionFailed(_))
        ));

        rig.effectuator.should_panic.store(false, Ordering::SeqCst);
        assert_eq!(rig.handle.trigger_effectuation().await.unwrap(), 1);

        rig.shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_task).await;
    }

    #[tokio::test]
    async fn scheduled_tick_skips_under_contention_without_error() {
        let rig = make_rig(1);

        assert!(rig
            .lock_store
            .try_acquire(
                TRANSFER_EFFECTUATION_LOCK,
                "other-worker",
                Duration::from_secs(60)
            )
            .unwrap());

        // Nothing escapes the tick: it returns, skips the work, and
        // records no run.
        rig.scheduler.scheduled_tick().await;
        assert_eq!(rig.effectuator.executions(), 0);
        assert!(rig.handle.get_last_run().unwrap().is_none());

        // The other holder's claim is untouched.
        assert!(!rig
            .lock_store
            .try_acquire(TRANSFER_EFFECTUATION_LOCK, "third-worker", Duration::from_secs(60))
            .unwrap());
    }

    #[tokio::test]
    async fn scheduled_tick_swallows_failure_and_recovers_next_tick() {
        let rig = make_rig(4);

        rig.effectuator.should_fail.store(true, Ordering::SeqCst);
        rig.scheduler.scheduled_tick().await;

        let failed = rig.handle.get_last_run().unwrap().unwrap();
        assert_eq!(failed.status, "failed");
        assert_eq!(failed.triggered_by, "schedule");
        assert!(failed.error_message.unwrap().contains("DB timeout"));

        // The failing tick released the lock, so the next one runs clean.
        rig.effectuator.should_fail.store(false, Ordering::SeqCst);
        rig.scheduler.scheduled_tick().await;

        let healthy = rig.handle.get_last_run().unwrap().unwrap();
        assert_eq!(healthy.status, "completed");
        assert_eq!(healthy.processed, Some(4));
        assert_eq!(healthy.triggered_by, "schedule");
        assert_eq!(rig.effectuator.executions(), 2);
    }

    #[tokio::test]
    async fn scheduled_tick_survives_lock_store_outage() {
        let temp_dir = TempDir::new().unwrap();
        let server_store =
            Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        let effectuator = CountingEffectuator::new(1);
        let shutdown_token = CancellationToken::new();

        let coordinator = LockCoordinator::new(Arc::new(UnreachableLockStore))
            .with_poll_interval(Duration::from_millis(10));
        let (scheduler, handle) = create_scheduler(
            coordinator,
            effectuator.clone() as Arc<dyn TransferEffectuator>,
            server_store as Arc<dyn ServerStore>,
            JobCadence::parse("0 3 * * *").unwrap(),
            LOCK_TIMEOUT,
            shutdown_token,
        );

        // Fail-safe on the scheduled path: no invocation, no panic.
        scheduler.scheduled_tick().await;
        assert_eq!(effectuator.executions(), 0);
        assert!(handle.get_last_run().unwrap().is_none());
    }

    /// Lock store stub that always errors, as if the shared database were
    /// unreachable.
    struct UnreachableLockStore;

    impl LockStore for UnreachableLockStore {
        fn try_acquire(&self, _name: &str, _holder: &str, _ttl: Duration) -> Result<bool> {
            Err(anyhow!("coordination database unreachable"))
        }

        fn release(&self, _name: &str, _holder: &str) -> Result<bool> {
            Err(anyhow!("coordination database unreachable"))
        }
    }

    #[tokio::test]
    async fn lock_store_outage_skips_work_without_panicking() {
        let temp_dir = TempDir::new().unwrap();
        let server_store =
            Arc::new(SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap());
        let effectuator = CountingEffectuator::new(1);
        let shutdown_token = CancellationToken::new();

        let coordinator = LockCoordinator::new(Arc::new(UnreachableLockStore))
            .with_poll_interval(Duration::from_millis(10));
        let (scheduler, handle) = create_scheduler(
            coordinator,
            effectuator.clone() as Arc<dyn TransferEffectuator>,
            server_store as Arc<dyn ServerStore>,
            JobCadence::parse("0 3 * * *").unwrap(),
            LOCK_TIMEOUT,
            shutdown_token.clone(),
        );
        let scheduler_task = spawn_scheduler(scheduler);

        // Fail-safe: reported as contention, zero effectuator invocations.
        assert!(matches!(
            handle.trigger_effectuation().await,
            Err(JobError::LockContention)
        ));
        assert_eq!(effectuator.executions(), 0);

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), scheduler_task).await;
    }

    #[tokio::test]
    async fn two_schedulers_sharing_a_lock_never_run_concurrently() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("coordination.db");

        // A slow effectuator that records overlap.
        struct SlowEffectuator {
            running: AtomicBool,
            overlapped: AtomicBool,
            executions: AtomicUsize,
        }

        impl TransferEffectuator for SlowEffectuator {
            fn effectuate_due_transfers(&self) -> Result<usize> {
                if self.running.swap(true, Ordering::SeqCst) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(50));
                self.running.store(false, Ordering::SeqCst);
                self.executions.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        }

        let effectuator = Arc::new(SlowEffectuator {
            running: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            executions: AtomicUsize::new(0),
        });

        let shutdown_token = CancellationToken::new();
        let mut handles = Vec::new();
        let mut tasks = Vec::new();
        for i in 0..2 {
            let lock_store: Arc<dyn LockStore> =
                Arc::new(SqliteLockStore::new(&lock_path).unwrap());
            let server_store: Arc<dyn ServerStore> = Arc::new(
                SqliteServerStore::new(temp_dir.path().join(format!("server-{}.db", i))).unwrap(),
            );
            let coordinator = LockCoordinator::new(lock_store)
                .with_poll_interval(Duration::from_millis(5));
            let (scheduler, handle) = create_scheduler(
                coordinator,
                effectuator.clone() as Arc<dyn TransferEffectuator>,
                server_store,
                JobCadence::parse("0 3 * * *").unwrap(),
                Duration::from_millis(20),
                shutdown_token.clone(),
            );
            tasks.push(spawn_scheduler(scheduler));
            handles.push(handle);
        }

        // Both "processes" trigger at the same moment; the lock serializes
        // them, so the loser either waits its turn or reports contention.
        let (a, b) = tokio::join!(
            handles[0].trigger_effectuation(),
            handles[1].trigger_effectuation(),
        );
        assert!(!effectuator.overlapped.load(Ordering::SeqCst));
        assert!(a.is_ok() || b.is_ok(), "at least one trigger must win");
        let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(effectuator.executions.load(Ordering::SeqCst), wins);

        shutdown_token.cancel();
        for task in tasks {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }
}
