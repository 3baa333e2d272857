//! Runtime configuration from environment variables (and `.env`)

use anyhow::Context;
use engine::{WorkerConfig, DEFAULT_DATA_DIRS};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/backtester.db";
pub const DEFAULT_ALLOW_ORIGINS: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub data_dirs: Vec<PathBuf>,
    pub worker: WorkerConfig,
    pub allow_origins: AllowedOrigins,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match get(key) {
                None => Ok(default),
                Some(raw) => {
                    let value: f64 = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{key} must be a number of seconds, got '{raw}'"))?;
                    anyhow::ensure!(
                        value.is_finite() && value > 0.0,
                        "{key} must be positive, got '{raw}'"
                    );
                    Duration::try_from_secs_f64(value)
                        .with_context(|| format!("{key} is out of range, got '{raw}'"))
                }
            }
        };

        let data_dirs = match get("BACKTEST_DATA_DIRS") {
            Some(raw) => split_list(&raw).into_iter().map(PathBuf::from).collect(),
            None => DEFAULT_DATA_DIRS.iter().map(PathBuf::from).collect(),
        };

        let origins = get("BACKTEST_ALLOW_ORIGINS").unwrap_or_else(|| DEFAULT_ALLOW_ORIGINS.into());
        let origins = split_list(&origins);
        let allow_origins = if origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        };

        let defaults = WorkerConfig::default();
        Ok(Self {
            db_path: get("BACKTEST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            data_dirs,
            worker: WorkerConfig {
                poll_interval: secs("BACKTEST_POLL_INTERVAL_SECS", defaults.poll_interval)?,
                backoff_interval: secs("BACKTEST_BACKOFF_SECS", defaults.backoff_interval)?,
            },
            allow_origins,
        })
    }
}
