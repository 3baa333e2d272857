//! SMA Backtester Engine
//!
//! Provides:
//! - CSV price-series source with date-range filtering
//! - SMA-crossover simulation with stop-loss / take-profit exits
//! - Trade-log metrics and text reports
//! - Fast/slow parameter sweep diagnostics
//! - Job worker that drains the persistent backtest queue

pub mod backtest;
pub mod diagnose;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod metrics;
pub mod payload;
pub mod report;
pub mod series;
pub mod types;
pub mod worker;

// Re-exports for convenience
pub use backtest::{execute_job, run_backtest};
pub use diagnose::{render_sweep, sweep, ParamReport, DEFAULT_SWEEP};
pub use engine::BacktestEngine;
pub use error::{BacktestError, BacktestResult};
pub use indicators::{AveragePair, MovingAveragePair};
pub use metrics::summarize;
pub use payload::{BacktestPayload, SmaCrossoverConfig, StrategyParams};
pub use report::render_report;
pub use series::{CsvSeriesSource, DateRange, PriceSeriesSource, DEFAULT_DATA_DIRS};
pub use types::*;
pub use worker::{Tick, Worker, WorkerConfig, WorkerProgress, WorkerSnapshot, WorkerStatus};
