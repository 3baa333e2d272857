//! Bar-by-bar SMA crossover simulation
//!
//! FLAT -> LONG when the fast SMA is strictly above the slow SMA. While LONG,
//! each later bar checks take-profit, then stop-loss, then a fast-below-slow
//! cross; the first hit closes the trade at that bar's close. An entry bar never
//! exits and an exit bar never re-enters.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{BacktestError, BacktestResult};
use crate::indicators::{AveragePair, MovingAveragePair};
use crate::payload::SmaCrossoverConfig;
use crate::types::*;

/// Position state during simulation
struct OpenPosition {
    entry_time: DateTime<Utc>,
    entry_price: f64,
}

impl OpenPosition {
    fn close(self, bar: &PriceBar, reason: ExitReason) -> Trade {
        Trade {
            entry_time: self.entry_time,
            exit_time: bar.timestamp,
            entry_price: self.entry_price,
            exit_price: bar.close,
            qty: 1.0,
            pnl: bar.close - self.entry_price,
            exit_reason: reason,
        }
    }

    fn return_at(&self, close: f64) -> BacktestResult<f64> {
        if self.entry_price == 0.0 {
            return Err(BacktestError::Arithmetic(format!(
                "cannot compute return on a zero entry price (entered {})",
                self.entry_time
            )));
        }
        Ok((close - self.entry_price) / self.entry_price)
    }
}

/// Backtesting engine that simulates bar-by-bar execution
pub struct BacktestEngine;

impl BacktestEngine {
    /// Run the crossover strategy over an ascending series and return the trade log.
    ///
    /// Pure: the same bars and config always give the same trades.
    pub fn run(config: &SmaCrossoverConfig, bars: &[PriceBar]) -> BacktestResult<Vec<Trade>> {
        let mut averages = MovingAveragePair::for_series(config.fast, config.slow, bars.len())?;
        let mut trades: Vec<Trade> = Vec::new();
        let mut position: Option<OpenPosition> = None;

        debug!(
            bars = bars.len(),
            fast = config.fast,
            slow = config.slow,
            stop_loss = ?config.stop_loss,
            take_profit = ?config.take_profit,
            force_close = config.force_close,
            "Starting simulation"
        );

        for bar in bars {
            let avg = averages.next(bar.close);

            match position.take() {
                None => {
                    if avg.is_bullish() {
                        debug!(price = bar.close, time = %bar.timestamp, "Opened LONG position");
                        position = Some(OpenPosition {
                            entry_time: bar.timestamp,
                            entry_price: bar.close,
                        });
                    }
                }
                Some(pos) => match Self::exit_reason(config, &pos, bar.close, &avg)? {
                    Some(reason) => {
                        let trade = pos.close(bar, reason);
                        debug!(
                            entry = trade.entry_price,
                            exit = trade.exit_price,
                            pnl = trade.pnl,
                            reason = reason.as_str(),
                            "Closed position"
                        );
                        trades.push(trade);
                    }
                    None => position = Some(pos),
                },
            }
        }

        // An open position at the end is either closed at the last bar or dropped entirely
        if let Some(pos) = position.take() {
            match bars.last() {
                Some(last) if config.force_close => {
                    trades.push(pos.close(last, ExitReason::ForceClose));
                }
                _ => debug!(entry = pos.entry_price, "Dropping open position at end of series"),
            }
        }

        info!(
            bars = bars.len(),
            trades = trades.len(),
            "Simulation complete"
        );

        Ok(trades)
    }

    /// First matching exit in priority order: take-profit, stop-loss, cross-down
    fn exit_reason(
        config: &SmaCrossoverConfig,
        pos: &OpenPosition,
        close: f64,
        avg: &AveragePair,
    ) -> BacktestResult<Option<ExitReason>> {
        if let Some(tp) = config.take_profit {
            if pos.return_at(close)? >= tp {
                return Ok(Some(ExitReason::TakeProfit));
            }
        }
        if let Some(sl) = config.stop_loss {
            if pos.return_at(close)? <= -sl.abs() {
                return Ok(Some(ExitReason::StopLoss));
            }
        }
        if avg.is_bearish() {
            return Ok(Some(ExitReason::SignalCross));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_bars(closes: &[f64]) -> Vec<PriceBar> {
        let t0 = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                timestamp: t0 + Duration::minutes(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 100.0,
            })
            .collect()
    }

    fn config(fast: usize, slow: usize) -> SmaCrossoverConfig {
        SmaCrossoverConfig {
            fast,
            slow,
            stop_loss: None,
            take_profit: None,
            force_close: true,
        }
    }

    fn assert_ordered(trades: &[Trade]) {
        for t in trades {
            assert!(t.exit_time >= t.entry_time);
            assert_eq!(t.qty, 1.0);
            assert_eq!(t.pnl, t.exit_price - t.entry_price);
        }
        for w in trades.windows(2) {
            assert!(w[0].exit_time <= w[1].entry_time);
        }
    }

    #[test]
    fn test_empty_and_single_bar() {
        let cfg = config(1, 2);
        assert!(BacktestEngine::run(&cfg, &[]).unwrap().is_empty());
        assert!(BacktestEngine::run(&cfg, &make_bars(&[10.0])).unwrap().is_empty());
    }

    #[test]
    fn test_crossover_round_trip() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 9.0, 8.0]);
        let trades = BacktestEngine::run(&config(1, 2), &bars).unwrap();

        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.entry_time, bars[1].timestamp);
        assert_eq!(t.entry_price, 11.0);
        assert_eq!(t.exit_time, bars[3].timestamp);
        assert_eq!(t.exit_price, 9.0);
        assert_eq!(t.pnl, -2.0);
        assert_eq!(t.exit_reason, ExitReason::SignalCross);
    }

    #[test]
    fn test_take_profit_wins_tie_with_stop_loss() {
        // Entry at 11; at 9.9 the return is -10%: tp=-20% and sl=5% both trigger,
        // and fast (9.9) < slow (10.45) is a cross-down as well.
        let bars = make_bars(&[10.0, 11.0, 9.9]);
        let cfg = SmaCrossoverConfig {
            take_profit: Some(-0.2),
            stop_loss: Some(0.05),
            ..config(1, 2)
        };
        let trades = BacktestEngine::run(&cfg, &bars).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(trades[0].exit_price, 9.9);
    }

    #[test]
    fn test_stop_loss_beats_signal_cross() {
        let bars = make_bars(&[10.0, 11.0, 10.4]);
        let cfg = SmaCrossoverConfig {
            stop_loss: Some(0.05),
            ..config(1, 2)
        };
        let trades = BacktestEngine::run(&cfg, &bars).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_negative_stop_loss_uses_magnitude() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 10.4]);
        let cfg = SmaCrossoverConfig {
            stop_loss: Some(-0.05),
            ..config(1, 3)
        };
        let trades = BacktestEngine::run(&cfg, &bars).unwrap();
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(trades[0].exit_price, 10.4);
    }

    #[test]
    fn test_take_profit_then_reentry_on_later_bar() {
        let bars = make_bars(&[10.0, 11.0, 13.0, 14.0, 15.0]);
        let cfg = SmaCrossoverConfig {
            take_profit: Some(0.1),
            ..config(1, 2)
        };
        let trades = BacktestEngine::run(&cfg, &bars).unwrap();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(trades[0].exit_price, 13.0);
        // No re-entry on the exit bar: the next entry is the following bar
        assert_eq!(trades[1].entry_time, bars[3].timestamp);
        assert_eq!(trades[1].exit_reason, ExitReason::ForceClose);
        assert_eq!(trades[1].exit_price, 15.0);
        assert!(trades[0].exit_time < trades[1].entry_time);
        assert_ordered(&trades);
    }

    #[test]
    fn test_entry_bar_never_exits() {
        // tp=0 would trigger at a zero return, but the entry bar itself is skipped
        let bars = make_bars(&[10.0, 11.0]);
        let cfg = SmaCrossoverConfig {
            take_profit: Some(0.0),
            force_close: false,
            ..config(1, 2)
        };
        assert!(BacktestEngine::run(&cfg, &bars).unwrap().is_empty());
    }

    #[test]
    fn test_force_close_adds_exactly_one_trade() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0]);
        let closed = BacktestEngine::run(&config(1, 2), &bars).unwrap();
        let dropped = BacktestEngine::run(
            &SmaCrossoverConfig {
                force_close: false,
                ..config(1, 2)
            },
            &bars,
        )
        .unwrap();

        assert_eq!(closed.len(), dropped.len() + 1);
        let last = closed.last().unwrap();
        assert_eq!(last.exit_reason, ExitReason::ForceClose);
        assert_eq!(last.exit_time, bars[3].timestamp);
        assert_eq!(last.exit_price, 13.0);
        assert_eq!(last.pnl, 2.0);
    }

    #[test]
    fn test_deterministic() {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + ((i as f64) * 0.37).sin() * 10.0 + (i % 7) as f64)
            .collect();
        let bars = make_bars(&closes);
        let cfg = SmaCrossoverConfig {
            stop_loss: Some(0.03),
            take_profit: Some(0.05),
            ..config(5, 20)
        };

        let a = BacktestEngine::run(&cfg, &bars).unwrap();
        let b = BacktestEngine::run(&cfg, &bars).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
        assert_ordered(&a);
    }

    #[test]
    fn test_zero_entry_price_with_thresholds_is_arithmetic_error() {
        let bars = make_bars(&[-1.0, 0.0, 5.0]);
        let cfg = SmaCrossoverConfig {
            take_profit: Some(0.1),
            ..config(1, 2)
        };
        assert!(matches!(
            BacktestEngine::run(&cfg, &bars),
            Err(BacktestError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_zero_window_is_invalid() {
        assert!(matches!(
            BacktestEngine::run(&config(0, 2), &make_bars(&[1.0, 2.0])),
            Err(BacktestError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_window_longer_than_series_matches_series_length() {
        let closes = [10.0, 12.0, 11.0, 14.0, 9.0, 8.0, 13.0];
        let bars = make_bars(&closes);
        let longer = BacktestEngine::run(&config(2, 50), &bars).unwrap();
        let exact = BacktestEngine::run(&config(2, closes.len()), &bars).unwrap();
        assert!(!longer.is_empty());
        assert_eq!(longer, exact);
    }

    #[test]
    fn test_oversized_windows_do_not_allocate_per_window() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 9.0, 8.0]);
        let huge = 1usize << 45;
        let trades = BacktestEngine::run(&config(1, huge), &bars).unwrap();
        assert_eq!(trades, BacktestEngine::run(&config(1, 5), &bars).unwrap());

        // Both windows past the end: identical running means never cross
        let flat = BacktestEngine::run(&config(huge, huge), &bars).unwrap();
        assert!(flat.is_empty());
    }
}
