//! Strategy repository: stored editor graphs referenced by backtest requests

use crate::{now_millis, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};

/// Input for creating a strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStrategy {
    pub name: String,
    pub graph: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Minimal listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StrategySummary {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, FromRow)]
struct StrategyRow {
    id: i64,
    name: String,
    graph: String,
    meta: Option<String>,
    created_at: i64,
}

/// A persisted strategy. The graph is opaque to the backtester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    pub graph: Value,
    pub metadata: Option<Value>,
    pub created_at: i64,
}

/// Repository for strategies
pub struct StrategyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> StrategyRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a strategy, returning its id
    pub async fn create(&self, strategy: &NewStrategy) -> DbResult<i64> {
        let meta = match &strategy.metadata {
            Some(m) => Some(serde_json::to_string(m)?),
            None => None,
        };
        let result = sqlx::query(
            "INSERT INTO strategies (name, graph, meta, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&strategy.name)
        .bind(serde_json::to_string(&strategy.graph)?)
        .bind(meta)
        .bind(now_millis())
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// List strategies, newest first
    pub async fn list(&self) -> DbResult<Vec<StrategySummary>> {
        let records = sqlx::query_as::<_, StrategySummary>(
            "SELECT id, name FROM strategies ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Get a strategy with its decoded graph
    pub async fn get(&self, id: i64) -> DbResult<Option<Strategy>> {
        let row = sqlx::query_as::<_, StrategyRow>(
            "SELECT id, name, graph, meta, created_at FROM strategies WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let metadata = match row.meta {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Some(Strategy {
            id: row.id,
            name: row.name,
            graph: serde_json::from_str(&row.graph)?,
            metadata,
            created_at: row.created_at,
        }))
    }

    /// Check whether a strategy exists
    pub async fn exists(&self, id: i64) -> DbResult<bool> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM strategies WHERE id = ?1")
            .bind(id)
            .fetch_one(self.pool)
            .await?;

        Ok(row.0 > 0)
    }
}
