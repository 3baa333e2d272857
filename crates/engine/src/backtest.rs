//! One backtest end to end: payload -> price series -> trades -> metrics

use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::engine::BacktestEngine;
use crate::error::{BacktestError, BacktestResult};
use crate::metrics::summarize;
use crate::payload::BacktestPayload;
use crate::series::PriceSeriesSource;
use crate::types::BacktestOutcome;

/// Load the requested series and simulate over it. Synchronous and CPU-bound.
pub fn run_backtest(
    source: &dyn PriceSeriesSource,
    payload: &BacktestPayload,
) -> BacktestResult<BacktestOutcome> {
    let range = payload.date_range()?;
    let bars = source.load(&payload.symbol, &payload.timeframe, &range)?;
    let trades = BacktestEngine::run(&payload.sma_config(), &bars)?;
    let metrics = summarize(&trades);

    info!(
        symbol = %payload.symbol,
        timeframe = %payload.timeframe,
        bars = bars.len(),
        trades = metrics.trades_count,
        total_pnl = metrics.total_pnl,
        "Backtest complete"
    );

    Ok(BacktestOutcome { trades, metrics })
}

/// Validate a raw job payload and run it on the blocking pool so the async
/// runtime keeps serving while the simulation runs.
pub async fn execute_job(
    source: Arc<dyn PriceSeriesSource>,
    payload: &Value,
) -> BacktestResult<BacktestOutcome> {
    let payload = BacktestPayload::from_value(payload)?;
    tokio::task::spawn_blocking(move || run_backtest(source.as_ref(), &payload))
        .await
        .map_err(|e| BacktestError::Aborted(e.to_string()))?
}
