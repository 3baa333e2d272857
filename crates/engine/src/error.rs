//! Error type shared by the series source, simulation and worker

use persistence::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Historical data not found for {symbol} {timeframe}")]
    DataNotFound { symbol: String, timeframe: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Malformed price data: {0}")]
    Data(String),

    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    #[error("Simulation task aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Store(#[from] DbError),
}

pub type BacktestResult<T> = Result<T, BacktestError>;
