//! Summary statistics over a trade log

use crate::types::{Metrics, Trade};

/// Aggregate a trade log. Win rate and average PnL are undefined without trades.
pub fn summarize(trades: &[Trade]) -> Metrics {
    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let count = trades.len();

    if count == 0 {
        return Metrics {
            total_pnl: 0.0,
            trades_count: 0,
            win_rate: None,
            avg_pnl: None,
        };
    }

    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();

    Metrics {
        total_pnl,
        trades_count: count,
        win_rate: Some(wins as f64 / count as f64),
        avg_pnl: Some(total_pnl / count as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExitReason;
    use chrono::{TimeZone, Utc};

    fn trade(pnl: f64) -> Trade {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            entry_time: t,
            exit_time: t,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            qty: 1.0,
            pnl,
            exit_reason: ExitReason::SignalCross,
        }
    }

    #[test]
    fn test_no_trades() {
        let m = summarize(&[]);
        assert_eq!(m.total_pnl, 0.0);
        assert_eq!(m.trades_count, 0);
        assert_eq!(m.win_rate, None);
        assert_eq!(m.avg_pnl, None);
    }

    #[test]
    fn test_breakeven_is_not_a_win() {
        let m = summarize(&[trade(4.0), trade(0.0), trade(-1.0), trade(1.0)]);
        assert_eq!(m.trades_count, 4);
        assert_eq!(m.total_pnl, 4.0);
        assert_eq!(m.win_rate, Some(0.5));
        assert_eq!(m.avg_pnl, Some(1.0));
    }

    #[test]
    fn test_single_losing_trade() {
        let m = summarize(&[trade(-2.0)]);
        assert_eq!(m.win_rate, Some(0.0));
        assert_eq!(m.avg_pnl, Some(-2.0));
    }
}
