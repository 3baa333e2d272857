//! Job payload: the typed, validated form of a backtest request
//!
//! Numeric fields are coerced the way clients tend to send them (`"20"` or
//! `20.0` for a window, `"0.03"` for a fraction). Anything that cannot be
//! coerced is rejected as `InvalidParameters` before any data is loaded.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BacktestError, BacktestResult};
use crate::series::DateRange;

pub const DEFAULT_TIMEFRAME: &str = "1m";
pub const DEFAULT_FAST: usize = 20;
pub const DEFAULT_SLOW: usize = 50;

fn default_timeframe() -> String {
    DEFAULT_TIMEFRAME.to_string()
}

fn default_fast() -> usize {
    DEFAULT_FAST
}

fn default_slow() -> usize {
    DEFAULT_SLOW
}

fn default_force_close() -> bool {
    true
}

/// SMA-crossover parameters as sent in `payload.params`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default = "default_fast", deserialize_with = "coerce_window")]
    pub fast: usize,
    #[serde(default = "default_slow", deserialize_with = "coerce_window")]
    pub slow: usize,
    /// Stop-loss fraction, e.g. 0.03
    #[serde(default, deserialize_with = "coerce_fraction", skip_serializing_if = "Option::is_none")]
    pub sl: Option<f64>,
    /// Take-profit fraction
    #[serde(default, deserialize_with = "coerce_fraction", skip_serializing_if = "Option::is_none")]
    pub tp: Option<f64>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            fast: DEFAULT_FAST,
            slow: DEFAULT_SLOW,
            sl: None,
            tp: None,
        }
    }
}

/// Immutable job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<i64>,
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: StrategyParams,
    #[serde(default = "default_force_close", deserialize_with = "coerce_bool")]
    pub force_close: bool,
}

/// Everything the simulation needs, already validated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmaCrossoverConfig {
    pub fast: usize,
    pub slow: usize,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub force_close: bool,
}

impl Default for SmaCrossoverConfig {
    fn default() -> Self {
        Self {
            fast: DEFAULT_FAST,
            slow: DEFAULT_SLOW,
            stop_loss: None,
            take_profit: None,
            force_close: true,
        }
    }
}

impl BacktestPayload {
    /// Decode and validate a stored payload document
    pub fn from_value(value: &Value) -> BacktestResult<Self> {
        let payload: Self = Self::deserialize(value)
            .map_err(|e| BacktestError::InvalidParameters(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Check semantic constraints serde cannot express
    pub fn validate(&self) -> BacktestResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(BacktestError::InvalidParameters("symbol is required".into()));
        }
        if self.timeframe.trim().is_empty() {
            return Err(BacktestError::InvalidParameters("timeframe is empty".into()));
        }
        if self.params.fast == 0 || self.params.slow == 0 {
            return Err(BacktestError::InvalidParameters(
                "fast and slow windows must be positive".into(),
            ));
        }
        self.date_range()?;
        Ok(())
    }

    pub fn date_range(&self) -> BacktestResult<DateRange> {
        DateRange::parse(self.start.as_deref(), self.end.as_deref())
    }

    pub fn sma_config(&self) -> SmaCrossoverConfig {
        SmaCrossoverConfig {
            fast: self.params.fast,
            slow: self.params.slow,
            stop_loss: self.params.sl,
            take_profit: self.params.tp,
            force_close: self.force_close,
        }
    }

    pub fn to_value(&self) -> Value {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Coercion helpers
// ============================================================================

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_window<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).map_err(de::Error::custom);
    }
    match number_from(&value) {
        Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => {
            Ok(f as usize)
        }
        _ => Err(de::Error::custom(format!(
            "window must be a non-negative integer, got {value}"
        ))),
    }
}

fn coerce_fraction<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match number_from(&value) {
        Some(f) if f.is_finite() => Ok(Some(f)),
        _ => Err(de::Error::custom(format!(
            "fraction must be a finite number, got {value}"
        ))),
    }
}

fn coerce_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(true),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(de::Error::custom(format!("not a boolean: {value}"))),
        },
        _ => Err(de::Error::custom(format!("not a boolean: {value}"))),
    }
}
