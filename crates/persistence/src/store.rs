//! Job queue interface consumed by workers and the API

use async_trait::async_trait;
use serde_json::Value;

use crate::repository::jobs::{BacktestJob, JobRepository};
use crate::{Database, DbError, DbResult};

/// Durable job queue with an at-most-one-claim guarantee.
///
/// Workers depend on this trait only, so the polling dequeue can later be
/// replaced by a notified one without touching worker logic.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a job in `queued` status
    async fn enqueue(&self, payload: &Value) -> DbResult<BacktestJob>;

    /// Atomically move the oldest queued job to `running` and return it
    async fn claim_next(&self) -> DbResult<Option<BacktestJob>>;

    /// `running` -> `finished`, storing the result document
    async fn complete(&self, job_id: i64, result: &Value) -> DbResult<BacktestJob>;

    /// `running` -> `failed`, storing the error message
    async fn fail(&self, job_id: i64, error: &str) -> DbResult<BacktestJob>;

    /// Fetch a job, `DbError::JobNotFound` if the id is unknown
    async fn get(&self, job_id: i64) -> DbResult<BacktestJob>;
}

#[async_trait]
impl JobStore for Database {
    async fn enqueue(&self, payload: &Value) -> DbResult<BacktestJob> {
        JobRepository::new(self.pool()).enqueue(payload).await
    }

    async fn claim_next(&self) -> DbResult<Option<BacktestJob>> {
        JobRepository::new(self.pool()).claim_next().await
    }

    async fn complete(&self, job_id: i64, result: &Value) -> DbResult<BacktestJob> {
        JobRepository::new(self.pool()).complete(job_id, result).await
    }

    async fn fail(&self, job_id: i64, error: &str) -> DbResult<BacktestJob> {
        JobRepository::new(self.pool()).fail(job_id, error).await
    }

    async fn get(&self, job_id: i64) -> DbResult<BacktestJob> {
        JobRepository::new(self.pool())
            .get(job_id)
            .await?
            .ok_or(DbError::JobNotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_store_through_trait_object() {
        let store: Arc<dyn JobStore> = Arc::new(Database::in_memory().await.unwrap());

        let job = store.enqueue(&json!({ "symbol": "ETHUSD" })).await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);

        store.complete(job.id, &json!({ "trades": [] })).await.unwrap();
        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_get_unknown_is_job_not_found() {
        let store = Database::in_memory().await.unwrap();
        let err = store.get(5).await.unwrap_err();
        assert!(matches!(err, DbError::JobNotFound(5)));
    }
}
