//! Moving averages for the crossover signal
//!
//! `ta`'s `SimpleMovingAverage` divides by the number of values seen until the
//! window fills, which is exactly the partial-window averaging the crossover
//! rule expects on the first `window - 1` bars.

use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::error::{BacktestError, BacktestResult};

/// Fast and slow SMA values for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragePair {
    pub fast: f64,
    pub slow: f64,
}

impl AveragePair {
    /// Fast strictly above slow
    pub fn is_bullish(&self) -> bool {
        self.fast > self.slow
    }

    /// Fast strictly below slow
    pub fn is_bearish(&self) -> bool {
        self.fast < self.slow
    }
}

/// Streaming fast/slow SMA over closing prices
pub struct MovingAveragePair {
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
}

impl MovingAveragePair {
    pub fn new(fast: usize, slow: usize) -> BacktestResult<Self> {
        let build = |period: usize, name: &str| {
            SimpleMovingAverage::new(period).map_err(|e| {
                BacktestError::InvalidParameters(format!("{name} window {period}: {e:?}"))
            })
        };
        Ok(Self {
            fast: build(fast, "fast")?,
            slow: build(slow, "slow")?,
        })
    }

    /// Pair sized for a series of `len` bars.
    ///
    /// A window at least as long as the series never fills, so it averages the
    /// same values as a window of exactly `len`; clamping keeps the buffer sized
    /// to the data instead of to the request.
    pub fn for_series(fast: usize, slow: usize, len: usize) -> BacktestResult<Self> {
        let cap = len.max(1);
        Self::new(fast.min(cap), slow.min(cap))
    }

    pub fn next(&mut self, close: f64) -> AveragePair {
        AveragePair {
            fast: self.fast.next(close),
            slow: self.slow.next(close),
        }
    }
}
