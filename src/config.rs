use std::path::PathBuf;

use chrono_tz::Tz;

use crate::engine::DEFAULT_BATCH_SIZE;

pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Journal directory. `None` keeps bookings in memory only.
    pub data_dir: Option<PathBuf>,
    pub timezone: Tz,
    pub batch_size: usize,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            timezone: Tz::UTC,
            batch_size: DEFAULT_BATCH_SIZE,
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownTimezone(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownTimezone(tz) => write!(f, "unknown timezone: {tz}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to their defaults; an unknown zone does not.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let timezone = match get("TIMETABLE_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimezone(name.clone()))?,
            None => defaults.timezone,
        };

        Ok(Config {
            data_dir: get("TIMETABLE_DATA_DIR").filter(|s| !s.is_empty()).map(PathBuf::from),
            timezone,
            batch_size: get("TIMETABLE_BATCH_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n >= 1)
                .unwrap_or(defaults.batch_size),
            metrics_port: get("TIMETABLE_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: get("TIMETABLE_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        })
    }
}
