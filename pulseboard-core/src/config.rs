//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pulseboard/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pulseboard/` (~/.config/pulseboard/)
//! - Data: `$XDG_DATA_HOME/pulseboard/` (~/.local/share/pulseboard/)
//! - State/Logs: `$XDG_STATE_HOME/pulseboard/` (~/.local/state/pulseboard/)

use crate::error::{Error, Result};
use chrono::{FixedOffset, NaiveDate};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Document store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Names of the source collections
    #[serde(default)]
    pub collections: CollectionsConfig,

    /// Metric computation settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Document store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Database file (defaults to the XDG data dir)
    pub path: Option<PathBuf>,

    /// Deadline for a single query in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Configured database path, or the default one.
    pub fn database_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::database_path)
    }
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

/// Collection names in the document store
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionsConfig {
    /// Daily active users per country
    pub daily_activity: String,
    /// Monthly active users per country
    pub monthly_activity: String,
    /// Daily new users per country
    pub new_users: String,
    /// One record per free-tier user with consumed cycles
    pub free_cycles: String,
    /// Error counts per day, one column per error kind
    pub errors_by_date: String,
    /// Invalid-format error counts per day, one column per type
    pub invalid_format_types: String,
    /// Feature call events
    pub calls: String,
    /// Created lists
    pub lists: String,
    /// Created reminders
    pub reminders: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            daily_activity: "dau-by-country".to_string(),
            monthly_activity: "mau-by-country".to_string(),
            new_users: "daily-new-users".to_string(),
            free_cycles: "free-cycles-by-country".to_string(),
            errors_by_date: "errors_by_date".to_string(),
            invalid_format_types: "invalid-format-types".to_string(),
            calls: "calls".to_string(),
            lists: "lists".to_string(),
            reminders: "reminders".to_string(),
        }
    }
}

/// Metric computation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    /// First day counted by the lifetime summary
    #[serde(default = "default_lifetime_start")]
    pub lifetime_start: NaiveDate,

    /// Countries preselected in dropdowns
    #[serde(default = "default_top_countries")]
    pub top_countries: usize,

    /// Offset of the reporting timezone from UTC, in minutes
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            lifetime_start: default_lifetime_start(),
            top_countries: default_top_countries(),
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

impl MetricsConfig {
    /// Reporting timezone as a fixed offset.
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "metrics.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.top_countries == 0 {
            return Err(Error::Config(
                "metrics.top_countries must be at least 1".to_string(),
            ));
        }
        self.utc_offset()?;
        Ok(())
    }
}

fn default_lifetime_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default()
}

fn default_top_countries() -> usize {
    15
}

fn default_utc_offset_minutes() -> i32 {
    // America/Argentina/Buenos_Aires, no DST
    -180
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        if self.store.query_timeout_ms == 0 {
            return Err(Error::Config(
                "store.query_timeout_ms must be greater than 0".to_string(),
            ));
        }
        crate::logging::level_filter(&self.logging.level)?;
        self.metrics.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pulseboard/config.toml` (~/.config/pulseboard/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pulseboard").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/pulseboard/` (~/.local/share/pulseboard/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("pulseboard")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pulseboard/` (~/.local/state/pulseboard/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pulseboard")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/pulseboard/documents.db` (~/.local/share/pulseboard/documents.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("documents.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pulseboard/pulseboard.log` (~/.local/state/pulseboard/pulseboard.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pulseboard.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.query_timeout_ms, 30_000);
        assert_eq!(config.collections.daily_activity, "dau-by-country");
        assert_eq!(config.collections.new_users, "daily-new-users");
        assert_eq!(
            config.metrics.lifetime_start,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
        assert_eq!(config.metrics.top_countries, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[store]
path = "/tmp/pulse.db"
query_timeout_ms = 500

[collections]
daily_activity = "dau"

[metrics]
lifetime_start = "2024-01-01"
utc_offset_minutes = 0

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.store.query_timeout(), Duration::from_millis(500));
        assert_eq!(config.store.database_path(), PathBuf::from("/tmp/pulse.db"));
        assert_eq!(config.collections.daily_activity, "dau");
        // Unlisted collections keep their defaults
        assert_eq!(config.collections.monthly_activity, "mau-by-country");
        assert_eq!(
            config.metrics.lifetime_start,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(config.metrics.utc_offset().unwrap().local_minus_utc(), 0);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = Config {
            store: StoreConfig {
                path: None,
                query_timeout_ms: 0,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            logging: LoggingConfig {
                level: "pulseboard_core=loud".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let metrics = MetricsConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(metrics.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[metrics]\ntop_countries = 5").unwrap();

        let config = Config::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.metrics.top_countries, 5);

        writeln!(file, "[metrics]\ntop_countries = 0").unwrap();
        assert!(Config::load_from(&file.path().to_path_buf()).is_err());
    }
}
