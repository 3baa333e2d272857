//! Historical price series loading
//!
//! A [`PriceSeriesSource`] returns bars for one (symbol, timeframe) pair, sorted
//! ascending with unique timestamps and filtered to an inclusive [`DateRange`].
//! The CSV source reads `{symbol}_{timeframe}.csv` from the first data directory
//! that has it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{BacktestError, BacktestResult};
use crate::types::PriceBar;

/// Directories searched when no explicit list is configured
pub const DEFAULT_DATA_DIRS: [&str; 2] = ["backend/data", "data"];

const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// ============================================================================
// Time parsing and range filter
// ============================================================================

/// A parsed date/time string: either an exact instant or a bare calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTime {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

impl ParsedTime {
    /// First instant covered (midnight for a bare date)
    pub fn start_of(&self) -> DateTime<Utc> {
        match self {
            ParsedTime::Instant(t) => *t,
            ParsedTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }

    /// Last instant covered (end of day for a bare date)
    pub fn end_of(&self) -> DateTime<Utc> {
        match self {
            ParsedTime::Instant(t) => *t,
            ParsedTime::Date(d) => d
                .and_hms_nano_opt(23, 59, 59, 999_999_999)
                .map(|n| n.and_utc())
                .unwrap_or_else(|| d.and_time(chrono::NaiveTime::MIN).and_utc()),
        }
    }
}

/// Parse RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]` or `YYYY-MM-DD`.
/// Naive values are taken as UTC.
pub fn parse_time(raw: &str) -> Option<ParsedTime> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(ParsedTime::Instant(t.with_timezone(&Utc)));
    }
    if let Ok(t) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ParsedTime::Instant(t.with_timezone(&Utc)));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ParsedTime::Instant(t.and_utc()));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(ParsedTime::Date)
}

/// Inclusive time filter; `None` is unbounded on that side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build a range from optional bound strings. Empty strings are unbounded;
    /// a bare date as `end` includes that whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> BacktestResult<Self> {
        let bound = |raw: Option<&str>, name: &str| -> BacktestResult<Option<ParsedTime>> {
            match raw.map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => parse_time(s).map(Some).ok_or_else(|| {
                    BacktestError::InvalidParameters(format!("{name} is not a date/time: '{s}'"))
                }),
            }
        };

        let range = Self {
            start: bound(start, "start")?.map(|t| t.start_of()),
            end: bound(end, "end")?.map(|t| t.end_of()),
        };
        if let (Some(s), Some(e)) = (range.start, range.end) {
            if s > e {
                return Err(BacktestError::InvalidParameters(format!(
                    "start {s} is after end {e}"
                )));
            }
        }
        Ok(range)
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *t >= s) && self.end.map_or(true, |e| *t <= e)
    }
}

// ============================================================================
// Source trait
// ============================================================================

/// Loads a clean, ascending price series. Implementations are synchronous and
/// are called from the blocking pool.
pub trait PriceSeriesSource: Send + Sync {
    /// Fails with `DataNotFound` when no series exists for the pair; an existing
    /// series that the range filters down to nothing is an empty `Vec`.
    fn load(&self, symbol: &str, timeframe: &str, range: &DateRange) -> BacktestResult<Vec<PriceBar>>;
}

/// Sort ascending, drop duplicate timestamps (first row wins), apply the range
pub fn normalize_series(mut bars: Vec<PriceBar>, range: &DateRange) -> Vec<PriceBar> {
    bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() < before {
        warn!(dropped = before - bars.len(), "Duplicate timestamps removed from series");
    }
    bars.retain(|b| range.contains(&b.timestamp));
    bars
}

// ============================================================================
// CSV source
// ============================================================================

/// Reads `{symbol}_{timeframe}.csv` files with a
/// `timestamp,open,high,low,close,volume` header
#[derive(Debug, Clone)]
pub struct CsvSeriesSource {
    data_dirs: Vec<PathBuf>,
}

impl Default for CsvSeriesSource {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIRS.iter().map(PathBuf::from).collect())
    }
}

impl CsvSeriesSource {
    pub fn new(data_dirs: Vec<PathBuf>) -> Self {
        Self { data_dirs }
    }

    /// First existing file for the pair, if any
    pub fn resolve(&self, symbol: &str, timeframe: &str) -> BacktestResult<Option<PathBuf>> {
        for part in [symbol, timeframe] {
            if part.is_empty() || part.contains(['/', '\\']) || part.contains("..") {
                return Err(BacktestError::InvalidParameters(format!(
                    "'{part}' is not a valid symbol/timeframe"
                )));
            }
        }
        let file_name = format!("{symbol}_{timeframe}.csv");
        Ok(self
            .data_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|p| p.is_file()))
    }

    fn read_file(path: &Path) -> BacktestResult<Vec<PriceBar>> {
        let display = path.display();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| BacktestError::Data(format!("{display}: {e}")))?;

        let headers = reader
            .headers()
            .map_err(|e| BacktestError::Data(format!("{display}: {e}")))?
            .clone();
        let mut columns = [0usize; 6];
        for (slot, name) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    BacktestError::Data(format!("{display}: missing '{name}' column"))
                })?;
        }
        let [ts_col, open_col, high_col, low_col, close_col, volume_col] = columns;

        let mut bars = Vec::new();
        for (i, record) in reader.records().enumerate() {
            // header is line 1
            let line = i + 2;
            let record = record.map_err(|e| BacktestError::Data(format!("{display}: {e}")))?;
            let field = |col: usize, name: &str| -> BacktestResult<f64> {
                let raw = record.get(col).unwrap_or_default();
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        BacktestError::Data(format!(
                            "{display}: line {line}: invalid {name} '{raw}'"
                        ))
                    })
            };

            let raw_ts = record.get(ts_col).unwrap_or_default();
            let timestamp = parse_time(raw_ts)
                .map(|t| t.start_of())
                .ok_or_else(|| {
                    BacktestError::Data(format!(
                        "{display}: line {line}: invalid timestamp '{raw_ts}'"
                    ))
                })?;

            bars.push(PriceBar {
                timestamp,
                open: field(open_col, "open")?,
                high: field(high_col, "high")?,
                low: field(low_col, "low")?,
                close: field(close_col, "close")?,
                volume: field(volume_col, "volume")?,
            });
        }
        Ok(bars)
    }
}

impl PriceSeriesSource for CsvSeriesSource {
    fn load(&self, symbol: &str, timeframe: &str, range: &DateRange) -> BacktestResult<Vec<PriceBar>> {
        let path = self
            .resolve(symbol, timeframe)?
            .ok_or_else(|| BacktestError::DataNotFound {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            })?;

        let raw = Self::read_file(&path)?;
        let total = raw.len();
        let bars = normalize_series(raw, range);

        debug!(
            path = %path.display(),
            rows = total,
            bars = bars.len(),
            "Loaded price series"
        );
        Ok(bars)
    }
}
