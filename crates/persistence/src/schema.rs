//! Database schema definitions

/// SQL to create all tables
/// NOTE: JSON documents (graph, payload, result) are stored as TEXT and decoded in Rust;
/// timestamps are epoch milliseconds.
pub const CREATE_TABLES: &str = r#"
-- Strategies (opaque editor graph, only checked for existence before a job is queued)
CREATE TABLE IF NOT EXISTS strategies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    graph TEXT NOT NULL,
    meta TEXT,
    created_at INTEGER NOT NULL
);

-- Backtest job queue
CREATE TABLE IF NOT EXISTS backtest_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued'
        CHECK (status IN ('queued', 'running', 'finished', 'failed')),
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (result IS NULL OR error IS NULL)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_strategies_created ON strategies(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_claim_order ON backtest_jobs(status, created_at, id)
"#;
