//! Job worker: claim queued backtests, run them, record the outcome
//!
//! One worker processes one job at a time. Any number of workers (tasks in one
//! process or separate processes) can share a store; the store's atomic claim
//! keeps a job from running twice.

use persistence::{DbError, DbResult, JobStore};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backtest::execute_job;
use crate::error::BacktestError;
use crate::series::PriceSeriesSource;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep after finding the queue empty
    pub poll_interval: Duration,
    /// Sleep after a store error
    pub backoff_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff_interval: DEFAULT_BACKOFF_INTERVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Idle,
    Processing,
}

/// Shared, monitoring-only view of a running worker
pub struct WorkerProgress {
    pub status: RwLock<WorkerStatus>,
    pub current_job: RwLock<Option<i64>>,
    pub jobs_finished: AtomicU32,
    pub jobs_failed: AtomicU32,
    pub loop_errors: AtomicU32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub status: WorkerStatus,
    pub current_job: Option<i64>,
    pub jobs_finished: u32,
    pub jobs_failed: u32,
    pub loop_errors: u32,
}

// Progress is informational; a poisoned lock still holds a usable value.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl WorkerProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(WorkerStatus::Idle),
            current_job: RwLock::new(None),
            jobs_finished: AtomicU32::new(0),
            jobs_failed: AtomicU32::new(0),
            loop_errors: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        *read(&self.status)
    }

    fn start_job(&self, job_id: i64) {
        *write(&self.current_job) = Some(job_id);
        *write(&self.status) = WorkerStatus::Processing;
    }

    fn end_job(&self) {
        *write(&self.current_job) = None;
        *write(&self.status) = WorkerStatus::Idle;
    }

    pub fn snapshot(&self, name: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            name: name.to_string(),
            status: self.status(),
            current_job: *read(&self.current_job),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for WorkerProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// What one loop iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Finished(i64),
    Failed(i64),
}

pub struct Worker {
    name: String,
    store: Arc<dyn JobStore>,
    source: Arc<dyn PriceSeriesSource>,
    config: WorkerConfig,
    progress: Arc<WorkerProgress>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn JobStore>,
        source: Arc<dyn PriceSeriesSource>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            source,
            config,
            progress: Arc::new(WorkerProgress::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn progress(&self) -> Arc<WorkerProgress> {
        self.progress.clone()
    }

    /// Claim at most one job and drive it to `finished` or `failed`.
    ///
    /// Job-level errors become the job's `error`; only store errors are returned.
    pub async fn tick(&self) -> DbResult<Tick> {
        let job = match self.store.claim_next().await? {
            Some(job) => job,
            None => return Ok(Tick::Idle),
        };

        info!(worker = %self.name, job_id = job.id, "Claimed backtest job");
        self.progress.start_job(job.id);
        let outcome = execute_job(self.source.clone(), &job.payload).await;
        let result = outcome.and_then(|o| {
            serde_json::to_value(&o).map_err(|e| BacktestError::Store(DbError::from(e)))
        });

        let failure = match result {
            Ok(doc) => match self.store.complete(job.id, &doc).await {
                Ok(_) => None,
                Err(e) => {
                    warn!(worker = %self.name, job_id = job.id, error = %e, "Saving result failed");
                    Some(format!("Failed to save result: {e}"))
                }
            },
            Err(e) => Some(e.to_string()),
        };

        let recorded = match failure {
            None => {
                self.progress.jobs_finished.fetch_add(1, Ordering::Relaxed);
                info!(worker = %self.name, job_id = job.id, "Job finished");
                Ok(Tick::Finished(job.id))
            }
            Some(message) => self.record_failure(job.id, &message).await,
        };
        self.progress.end_job();
        recorded
    }

    /// Mark the job failed; an error here is the only way a claimed job escapes.
    async fn record_failure(&self, job_id: i64, message: &str) -> DbResult<Tick> {
        warn!(worker = %self.name, job_id, error = %message, "Job failed");
        self.store.fail(job_id, message).await?;
        self.progress.jobs_failed.fetch_add(1, Ordering::Relaxed);
        Ok(Tick::Failed(job_id))
    }

    /// Poll forever. Returns only when the surrounding task is dropped.
    pub async fn run(&self) {
        info!(
            worker = %self.name,
            poll_secs = self.config.poll_interval.as_secs_f64(),
            backoff_secs = self.config.backoff_interval.as_secs_f64(),
            "Worker started"
        );

        loop {
            match self.tick().await {
                Ok(Tick::Idle) => {
                    debug!(worker = %self.name, "Queue empty");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Worker loop error");
                    self.progress.loop_errors.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.config.backoff_interval).await;
                }
            }
        }
    }
}
