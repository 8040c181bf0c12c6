//! Configuration management
//!
//! Optional JSON config file; every section falls back to its defaults.
//! Kite credentials are read from the environment (`KITE_API_KEY`,
//! `KITE_ACCESS_TOKEN`) when set, overriding the file.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::indicators::IST_OFFSET_SECS;
use crate::providers::{BarRequest, Interval};
use crate::risk::{RiskConfig, RiskConfigError, DEFAULT_BUDGET, DEFAULT_RISK_PCT};
use crate::scanner::{ScannerConfig, DEFAULT_CONCURRENCY};
use crate::universe::{DEFAULT_SUFFIX, NIFTY50_URL};

pub const ENV_KITE_API_KEY: &str = "KITE_API_KEY";
pub const ENV_KITE_ACCESS_TOKEN: &str = "KITE_ACCESS_TOKEN";

/// Usual operator range for risk per trade
pub const RECOMMENDED_RISK_PCT: (f64, f64) = (0.005, 0.02);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Risk(#[from] RiskConfigError),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Where bars come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Yahoo,
    Zerodha,
    Csv,
}

impl std::str::FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yahoo" => Ok(DataSource::Yahoo),
            "zerodha" | "kite" => Ok(DataSource::Zerodha),
            "csv" => Ok(DataSource::Csv),
            _ => Err(format!(
                "Unknown data source: {}. Use 'yahoo', 'zerodha' or 'csv'",
                s
            )),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Yahoo => write!(f, "yahoo"),
            DataSource::Zerodha => write!(f, "zerodha"),
            DataSource::Csv => write!(f, "csv"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub scanner: ScannerSection,
    #[serde(default)]
    pub universe: UniverseSection,
    #[serde(default)]
    pub data: DataSection,
    #[serde(default)]
    pub zerodha: ZerodhaSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_budget")]
    pub budget: f64,
    /// Fraction of the budget risked per trade (0.01 = 1%)
    #[serde(default = "default_risk_pct")]
    pub risk_pct: f64,
}

fn default_budget() -> f64 {
    DEFAULT_BUDGET
}

fn default_risk_pct() -> f64 {
    DEFAULT_RISK_PCT
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            risk_pct: DEFAULT_RISK_PCT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSection {
    #[serde(default)]
    pub source: DataSource,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    #[serde(default)]
    pub interval: Interval,
    /// Order signals by last-bar volume instead of input order
    #[serde(default)]
    pub sort_by_volume: bool,
    /// Exchange offset from UTC used to date sessions (IST = 330)
    #[serde(default = "default_session_utc_offset_minutes")]
    pub session_utc_offset_minutes: i32,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_period_days() -> u32 {
    1
}

fn default_session_utc_offset_minutes() -> i32 {
    IST_OFFSET_SECS / 60
}

impl Default for ScannerSection {
    fn default() -> Self {
        Self {
            source: DataSource::default(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            period_days: default_period_days(),
            interval: Interval::default(),
            sort_by_volume: false,
            session_utc_offset_minutes: default_session_utc_offset_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSection {
    /// Constituents CSV with a `Symbol` column
    #[serde(default = "default_universe_url")]
    pub url: String,
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Fixed tickers; when set the remote list is not fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tickers: Option<Vec<String>>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_universe_url() -> String {
    NIFTY50_URL.to_string()
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for UniverseSection {
    fn default() -> Self {
        Self {
            url: default_universe_url(),
            suffix: default_suffix(),
            tickers: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZerodhaSection {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    /// Trading symbol -> instrument token; unknown symbols are looked up
    /// in the instruments dump
    #[serde(default)]
    pub instruments: HashMap<String, u64>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Config file when given, defaults otherwise, with the environment
    /// applied. Callers validate after applying their own overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let mut config = Config::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    /// Pull Kite credentials from the environment
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var(ENV_KITE_API_KEY) {
            self.zerodha.api_key = Some(api_key);
        }
        if let Ok(token) = std::env::var(ENV_KITE_ACCESS_TOKEN) {
            self.zerodha.access_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk_config()?;

        let (low, high) = RECOMMENDED_RISK_PCT;
        if self.risk.risk_pct < low || self.risk.risk_pct > high {
            warn!(
                risk_pct = self.risk.risk_pct,
                "risk_pct is outside the usual {:.1}%-{:.1}% range",
                low * 100.0,
                high * 100.0
            );
        }

        if self.scanner.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "scanner.concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if self.scanner.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "scanner.timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.scanner.period_days == 0 {
            return Err(ConfigError::Invalid {
                field: "scanner.period_days",
                reason: "must be at least 1".into(),
            });
        }
        self.session_offset()?;
        if self.scanner.source == DataSource::Zerodha {
            for (field, value) in [
                (ENV_KITE_API_KEY, &self.zerodha.api_key),
                (ENV_KITE_ACCESS_TOKEN, &self.zerodha.access_token),
            ] {
                if value.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: "required for the zerodha data source".into(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn risk_config(&self) -> Result<RiskConfig, RiskConfigError> {
        RiskConfig::new(self.risk.budget, self.risk.risk_pct)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner.timeout_secs)
    }

    pub fn session_offset(&self) -> Result<FixedOffset, ConfigError> {
        let minutes = self.scanner.session_utc_offset_minutes;
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                field: "scanner.session_utc_offset_minutes",
                reason: format!("{} is not within +/-24h", minutes),
            })
    }

    pub fn scanner_config(&self) -> Result<ScannerConfig, ConfigError> {
        Ok(ScannerConfig::default()
            .with_concurrency(self.scanner.concurrency)
            .with_fetch_timeout(self.fetch_timeout())
            .with_session_offset(self.session_offset()?)
            .with_request(
                BarRequest::default()
                    .with_period_days(self.scanner.period_days)
                    .with_interval(self.scanner.interval),
            ))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.universe.cache_ttl_secs)
    }
}
