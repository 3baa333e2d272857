//! Parameter sweep diagnostics
//!
//! Runs the crossover over one series for several fast/slow pairs and reports
//! the tail of the averages, every cross-up and the resulting trades. Used from
//! the CLI to see why a parameter choice produces no (or too many) trades.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::engine::BacktestEngine;
use crate::error::{BacktestError, BacktestResult};
use crate::indicators::MovingAveragePair;
use crate::metrics::summarize;
use crate::payload::SmaCrossoverConfig;
use crate::types::{Metrics, PriceBar, Trade};

pub const DEFAULT_SWEEP: [(usize, usize); 6] = [(2, 3), (2, 4), (3, 5), (5, 8), (10, 20), (2, 50)];

/// Rows printed from the end of each series
pub const TAIL_ROWS: usize = 8;

/// Direction of the fast/slow relationship change on a bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cross {
    Up,
    Down,
    None,
}

impl Cross {
    fn as_i8(&self) -> i8 {
        match self {
            Cross::Up => 1,
            Cross::Down => -1,
            Cross::None => 0,
        }
    }
}

/// One bar with both averages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmaRow {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub fast: f64,
    pub slow: f64,
    pub cross: Cross,
}

/// Averages for every bar. The first bar never counts as a cross.
pub fn compute_smas(bars: &[PriceBar], fast: usize, slow: usize) -> BacktestResult<Vec<SmaRow>> {
    let mut averages = MovingAveragePair::for_series(fast, slow, bars.len())?;
    let mut above: Option<bool> = None;

    Ok(bars
        .iter()
        .map(|bar| {
            let avg = averages.next(bar.close);
            let now = avg.is_bullish();
            let cross = match above.replace(now) {
                Some(false) if now => Cross::Up,
                Some(true) if !now => Cross::Down,
                _ => Cross::None,
            };
            SmaRow {
                timestamp: bar.timestamp,
                close: bar.close,
                fast: avg.fast,
                slow: avg.slow,
                cross,
            }
        })
        .collect())
}

/// Sweep result for one fast/slow pair
#[derive(Debug, Clone, PartialEq)]
pub struct ParamReport {
    pub fast: usize,
    pub slow: usize,
    pub tail: Vec<SmaRow>,
    pub cross_ups: Vec<SmaRow>,
    pub trades: Vec<Trade>,
    pub metrics: Metrics,
}

/// Run every pair over the same bars; exits and force-close come from `base`
pub fn sweep(
    bars: &[PriceBar],
    pairs: &[(usize, usize)],
    base: &SmaCrossoverConfig,
) -> BacktestResult<Vec<ParamReport>> {
    pairs
        .iter()
        .map(|&(fast, slow)| {
            let rows = compute_smas(bars, fast, slow)?;
            let config = SmaCrossoverConfig { fast, slow, ..*base };
            let trades = BacktestEngine::run(&config, bars)?;
            let metrics = summarize(&trades);
            Ok(ParamReport {
                fast,
                slow,
                tail: rows[rows.len().saturating_sub(TAIL_ROWS)..].to_vec(),
                cross_ups: rows.into_iter().filter(|r| r.cross == Cross::Up).collect(),
                trades,
                metrics,
            })
        })
        .collect()
}

/// Parse `FAST:SLOW` (or `FAST,SLOW`)
pub fn parse_pair(raw: &str) -> BacktestResult<(usize, usize)> {
    let invalid = || BacktestError::InvalidParameters(format!("expected FAST:SLOW, got '{raw}'"));
    let (fast, slow) = raw.split_once([':', ',']).ok_or_else(invalid)?;
    let fast: usize = fast.trim().parse().map_err(|_| invalid())?;
    let slow: usize = slow.trim().parse().map_err(|_| invalid())?;
    if fast == 0 || slow == 0 {
        return Err(BacktestError::InvalidParameters(
            "fast and slow windows must be positive".into(),
        ));
    }
    Ok((fast, slow))
}

fn write_row(out: &mut String, row: &SmaRow) {
    let _ = writeln!(
        out,
        "  {}  close={:<12} fast={:<14.4} slow={:<14.4} signal={}",
        row.timestamp.to_rfc3339(),
        row.close,
        row.fast,
        row.slow,
        row.cross.as_i8()
    );
}

/// Text listing of a sweep, one section per pair
pub fn render_sweep(reports: &[ParamReport]) -> String {
    let mut out = String::new();
    for report in reports {
        let _ = writeln!(out, "\n=== params fast={} slow={} ===", report.fast, report.slow);

        let _ = writeln!(out, "Last {} rows:", report.tail.len());
        for row in &report.tail {
            write_row(&mut out, row);
        }

        if report.cross_ups.is_empty() {
            out.push_str("No cross-up events detected for these params.\n");
        } else {
            let _ = writeln!(out, "Cross-up events ({}):", report.cross_ups.len());
            for row in &report.cross_ups {
                write_row(&mut out, row);
            }
        }

        let _ = writeln!(
            out,
            "Trades found: {} | total_pnl={} | win_rate={}",
            report.metrics.trades_count,
            report.metrics.total_pnl,
            report
                .metrics
                .win_rate
                .map(|w| format!("{:.2}", w))
                .unwrap_or_else(|| "n/a".into()),
        );
        for trade in &report.trades {
            let _ = writeln!(
                out,
                "  {} @ {} -> {} @ {} pnl={} ({})",
                trade.entry_time.to_rfc3339(),
                trade.entry_price,
                trade.exit_time.to_rfc3339(),
                trade.exit_price,
                trade.pnl,
                trade.exit_reason.as_str()
            );
        }
    }
    out.push_str("\nDone parameter sweep.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExitReason;
    use chrono::{Duration, TimeZone};

    fn make_bars(closes: &[f64]) -> Vec<PriceBar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                timestamp: t0 + Duration::minutes(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_cross_signals() {
        let rows = compute_smas(&make_bars(&[10.0, 11.0, 12.0, 9.0, 8.0, 12.0]), 1, 2).unwrap();
        let crosses: Vec<Cross> = rows.iter().map(|r| r.cross).collect();
        assert_eq!(
            crosses,
            vec![Cross::None, Cross::Up, Cross::None, Cross::Down, Cross::None, Cross::Up]
        );
        assert_eq!(rows[1].fast, 11.0);
        assert_eq!(rows[1].slow, 10.5);
    }

    #[test]
    fn test_flat_series_has_no_crosses() {
        let rows = compute_smas(&make_bars(&[5.0, 5.0, 5.0]), 1, 2).unwrap();
        assert!(rows.iter().all(|r| r.cross == Cross::None));
    }

    #[test]
    fn test_sweep_matches_engine_per_pair() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i as f64) * 0.5).sin() * 5.0)
            .collect();
        let bars = make_bars(&closes);
        let base = SmaCrossoverConfig::default();

        let reports = sweep(&bars, &DEFAULT_SWEEP, &base).unwrap();
        assert_eq!(reports.len(), DEFAULT_SWEEP.len());
        for (report, &(fast, slow)) in reports.iter().zip(DEFAULT_SWEEP.iter()) {
            let config = SmaCrossoverConfig { fast, slow, ..base };
            let trades = BacktestEngine::run(&config, &bars).unwrap();
            assert_eq!(report.trades, trades);
            assert_eq!(report.metrics, summarize(&trades));
            assert_eq!(report.tail.len(), TAIL_ROWS);
            assert_eq!(report.tail.last().map(|r| r.timestamp), bars.last().map(|b| b.timestamp));
        }
        assert!(reports.iter().any(|r| !r.cross_ups.is_empty()));
    }

    #[test]
    fn test_sweep_short_series_and_long_windows() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 9.0, 8.0]);
        let reports = sweep(&bars, &[(1, 2), (2, 50)], &SmaCrossoverConfig::default()).unwrap();

        assert_eq!(reports[0].tail.len(), 5);
        assert_eq!(reports[0].cross_ups.len(), 1);
        assert_eq!(reports[0].trades.len(), 1);
        assert_eq!(reports[0].trades[0].exit_reason, ExitReason::SignalCross);
        assert_eq!(reports[1].slow, 50);
    }

    #[test]
    fn test_zero_window_fails_the_sweep() {
        let bars = make_bars(&[1.0, 2.0]);
        assert!(matches!(
            sweep(&bars, &[(1, 2), (0, 3)], &SmaCrossoverConfig::default()),
            Err(BacktestError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("5:20").unwrap(), (5, 20));
        assert_eq!(parse_pair(" 2 , 50 ").unwrap(), (2, 50));
        assert!(parse_pair("5").is_err());
        assert!(parse_pair("a:b").is_err());
        assert!(parse_pair("0:3").is_err());
    }

    #[test]
    fn test_render_sweep() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 9.0, 8.0]);
        let reports = sweep(&bars, &[(1, 2), (3, 3)], &SmaCrossoverConfig::default()).unwrap();
        let text = render_sweep(&reports);

        assert!(text.contains("=== params fast=1 slow=2 ==="));
        assert!(text.contains("Cross-up events (1):"));
        assert!(text.contains("Trades found: 1 | total_pnl=-2 | win_rate=0.00"));
        assert!(text.contains("(signal_cross)"));
        // equal windows never cross
        assert!(text.contains("No cross-up events detected for these params."));
        assert!(text.ends_with("Done parameter sweep.\n"));
    }
}
