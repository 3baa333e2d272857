//! Backtest job repository: durable queue with an atomic claim

use crate::{now_millis, DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

const JOB_COLUMNS: &str = "id, payload, status, result, error, created_at, updated_at";

/// Lifecycle status of a backtest job. Transitions only move forward:
/// queued -> running -> finished | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DbError::Query(format!("unknown job status '{other}'"))),
        }
    }
}

/// Raw row as stored in `backtest_jobs`
#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    payload: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

/// A backtest job with decoded JSON documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestJob {
    pub id: i64,
    pub payload: Value,
    pub status: JobStatus,
    /// Present iff status is `finished`
    pub result: Option<Value>,
    /// Present iff status is `failed`
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<JobRow> for BacktestJob {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let result = match row.result {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Self {
            id: row.id,
            payload: serde_json::from_str(&row.payload)?,
            status: row.status.parse()?,
            result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Number of jobs in each status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: i64,
    pub running: i64,
    pub finished: i64,
    pub failed: i64,
}

/// Repository for the backtest job queue
pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new job in `queued` status
    pub async fn enqueue(&self, payload: &Value) -> DbResult<BacktestJob> {
        let now = now_millis();
        let sql = format!(
            "INSERT INTO backtest_jobs (payload, status, created_at, updated_at)
             VALUES (?1, 'queued', ?2, ?2)
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(serde_json::to_string(payload)?)
            .bind(now)
            .fetch_one(self.pool)
            .await?;

        row.try_into()
    }

    /// Claim the oldest queued job, moving it to `running`.
    ///
    /// Selection and transition are one conditional UPDATE, so two callers can never
    /// both observe the same job as claimed: the loser's `status = 'queued'` guard no
    /// longer matches and it gets `None` (or the next queued job).
    pub async fn claim_next(&self) -> DbResult<Option<BacktestJob>> {
        let sql = format!(
            "UPDATE backtest_jobs
             SET status = 'running', updated_at = ?1
             WHERE id = (
                 SELECT id FROM backtest_jobs
                 WHERE status = 'queued'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
             )
             AND status = 'queued'
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now_millis())
            .fetch_optional(self.pool)
            .await?;

        if let Some(row) = &row {
            debug!(job_id = row.id, "Job claimed");
        }
        row.map(BacktestJob::try_from).transpose()
    }

    /// Mark a running job finished and store its result document
    pub async fn complete(&self, job_id: i64, result: &Value) -> DbResult<BacktestJob> {
        let result = serde_json::to_string(result)?;
        self.leave_running(job_id, JobStatus::Finished, Some(result), None)
            .await
    }

    /// Mark a running job failed and store the error message
    pub async fn fail(&self, job_id: i64, error: &str) -> DbResult<BacktestJob> {
        self.leave_running(job_id, JobStatus::Failed, None, Some(error.to_string()))
            .await
    }

    /// Transition out of `running`; the status guard and the write are the same statement.
    async fn leave_running(
        &self,
        job_id: i64,
        to: JobStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> DbResult<BacktestJob> {
        let sql = format!(
            "UPDATE backtest_jobs
             SET status = ?1, result = ?2, error = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'running'
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(to.as_str())
            .bind(result)
            .bind(error)
            .bind(now_millis())
            .bind(job_id)
            .fetch_optional(self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get(job_id).await? {
                Some(job) => {
                    warn!(job_id, from = %job.status, to = %to, "Rejected job transition");
                    Err(DbError::InvalidTransition {
                        id: job_id,
                        from: job.status,
                        to,
                    })
                }
                None => Err(DbError::JobNotFound(job_id)),
            },
        }
    }

    /// Get a job by id
    pub async fn get(&self, job_id: i64) -> DbResult<Option<BacktestJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM backtest_jobs WHERE id = ?1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(BacktestJob::try_from).transpose()
    }

    /// Count jobs per status
    pub async fn count_by_status(&self) -> DbResult<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM backtest_jobs GROUP BY status")
                .fetch_all(self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status.parse::<JobStatus>()? {
                JobStatus::Queued => counts.queued = count,
                JobStatus::Running => counts.running = count,
                JobStatus::Finished => counts.finished = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
