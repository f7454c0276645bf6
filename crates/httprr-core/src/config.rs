//! Record/replay policy.
//!
//! Whether a trace may be (re-)recorded is an explicit value handed to
//! [`RecordReplay::open`](crate::RecordReplay::open), so engines with different
//! policies can coexist in one process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use crate::error::{HttprrError, HttprrResult};

pub const RECORD_ENV: &str = "HTTPRR_RECORD";
pub const RECORD_DELAY_ENV: &str = "HTTPRR_RECORD_DELAY_MS";
pub const TESTDATA_DIR_ENV: &str = "HTTPRR_TESTDATA_DIR";

pub const DEFAULT_TESTDATA_DIR: &str = "testdata";

#[derive(Debug, Clone)]
pub struct Config {
    record: Option<Regex>,
    record_delay: Duration,
    testdata_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            record: None,
            record_delay: Duration::ZERO,
            testdata_dir: PathBuf::from(DEFAULT_TESTDATA_DIR),
        }
    }
}

impl Config {
    /// Replay everything; never record.
    pub fn replay_only() -> Self {
        Self::default()
    }

    /// Read `HTTPRR_RECORD`, `HTTPRR_RECORD_DELAY_MS` and `HTTPRR_TESTDATA_DIR`.
    pub fn from_env() -> HttprrResult<Self> {
        let mut config = Self::default();
        if let Ok(pattern) = std::env::var(RECORD_ENV) {
            config = config.with_record_pattern(&pattern)?;
        }
        if let Some(ms) = std::env::var(RECORD_DELAY_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.record_delay = Duration::from_millis(ms);
        }
        if let Ok(dir) = std::env::var(TESTDATA_DIR_ENV) {
            if !dir.is_empty() {
                config.testdata_dir = PathBuf::from(dir);
            }
        }
        Ok(config)
    }

    /// Record files whose name matches `pattern`. An empty pattern disables recording.
    pub fn with_record_pattern(mut self, pattern: &str) -> HttprrResult<Self> {
        self.record = if pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(pattern).map_err(|source| HttprrError::InvalidRecordPattern {
                    pattern: pattern.to_string(),
                    source,
                })?,
            )
        };
        Ok(self)
    }

    /// Sleep this long after each real call while recording.
    pub fn with_record_delay(mut self, delay: Duration) -> Self {
        self.record_delay = delay;
        self
    }

    pub fn with_testdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.testdata_dir = dir.into();
        self
    }

    pub fn record_pattern(&self) -> Option<&str> {
        self.record.as_ref().map(Regex::as_str)
    }

    pub fn record_delay(&self) -> Duration {
        self.record_delay
    }

    pub fn testdata_dir(&self) -> &Path {
        &self.testdata_dir
    }

    /// Whether `file` should be recorded rather than replayed.
    pub fn recording(&self, file: &Path) -> bool {
        self.record
            .as_ref()
            .is_some_and(|re| re.is_match(&file.to_string_lossy()))
    }
}
