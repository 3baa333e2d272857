//! Plain-text report of a backtest result document
//!
//! Accepts either a job as returned by the API (`{"result": {...}, ...}`) or a
//! bare `{"trades": [...], "metrics": {...}}` document. Fields are read
//! leniently so that partially written files still print.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Write;

use crate::series::parse_time;

const METRIC_ORDER: [&str; 4] = ["total_pnl", "trades_count", "win_rate", "avg_pnl"];

fn result_document(doc: &Value) -> &Value {
    match doc.get("result") {
        Some(inner) => inner,
        None => doc,
    }
}

fn display(value: Option<&Value>) -> String {
    match value {
        None => "n/a".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value.and_then(Value::as_str).and_then(parse_time).map(|t| t.start_of())
}

/// Render metrics, trade count and one line per trade with its holding time
pub fn render_report(doc: &Value) -> String {
    let result = result_document(doc);
    let empty = Vec::new();
    let trades = result
        .get("trades")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut out = String::new();
    out.push_str("METRICS:\n");
    match result.get("metrics").and_then(Value::as_object) {
        Some(metrics) if !metrics.is_empty() => {
            for key in METRIC_ORDER.iter().filter(|k| metrics.contains_key(**k)) {
                let _ = writeln!(out, "  {key}: {}", display(metrics.get(*key)));
            }
            for (key, value) in metrics.iter().filter(|(k, _)| !METRIC_ORDER.contains(&k.as_str())) {
                let _ = writeln!(out, "  {key}: {}", display(Some(value)));
            }
        }
        _ => out.push_str("  (no metrics found)\n"),
    }
    let _ = writeln!(out, "Number of trades: {}\n", trades.len());

    if trades.is_empty() {
        out.push_str("No trades in this backtest.\n");
        return out;
    }

    for (i, trade) in trades.iter().enumerate() {
        let _ = writeln!(
            out,
            "Trade {}: entry={} at {} | exit={} at {} | pnl={} | reason={}",
            i + 1,
            display(trade.get("entry_price")),
            display(trade.get("entry_time")),
            display(trade.get("exit_price")),
            display(trade.get("exit_time")),
            display(trade.get("pnl")),
            display(trade.get("exit_reason")),
        );
        if let (Some(entry), Some(exit)) = (
            instant(trade.get("entry_time")),
            instant(trade.get("exit_time")),
        ) {
            let _ = writeln!(out, "         duration: {} seconds", (exit - entry).num_seconds());
        }
        out.push('\n');
    }
    out
}
