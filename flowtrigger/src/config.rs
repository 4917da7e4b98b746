//! Configuration management for the engine
//!
//! Values come from three layers, lowest precedence first: built-in defaults,
//! `FLOWTRIGGER_*` environment variables, and an optional `flowtrigger.yaml`.

use crate::common::env_loader::EnvLoader;
use crate::trigger::BusinessHours;
use chrono::{NaiveTime, Weekday};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = "flowtrigger.yaml";
const ENV_PREFIX: &str = "FLOWTRIGGER";
const TIME_FORMAT: &str = "%H:%M";
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path to the configuration file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content from a configuration file
    #[error("Invalid YAML syntax in {path}:\n{source}\n\nHint: Check for proper indentation and YAML formatting")]
    YamlParse {
        /// Path to the configuration file with invalid YAML content
        path: PathBuf,
        /// Underlying YAML parsing error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Name of the offending field
        field: String,
        /// The value that was provided
        value: String,
        /// How to fix it
        hint: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    Validation {
        /// Description of the failure
        message: String,
    },
}

/// Runtime settings of the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to every action attempt (default: 30000)
    pub action_timeout_ms: u64,
    /// Attempts per action including the first one (default: 3)
    pub max_attempts: u32,
    /// First retry delay (default: 200)
    pub backoff_base_ms: u64,
    /// Upper bound for the retry delay (default: 5000)
    pub backoff_max_ms: u64,
    /// How long a dedup key suppresses repeat fires (default: 3600)
    pub dedup_ttl_secs: u64,
    /// Maximum number of remembered dedup keys (default: 10000)
    pub dedup_capacity: usize,
    /// Action worker tasks (default: 4)
    pub worker_count: usize,
    /// Bounded action queue length (default: 1024)
    pub queue_capacity: usize,
    /// Maximum nesting of trigger -> flow -> trigger cascades (default: 5)
    pub max_cascade_depth: u32,
    /// Seconds between sweeps that forget completed flow instances, 0 disables (default: 300)
    pub prune_interval_secs: u64,
    /// Window used by `business_hours_only` triggers
    pub business_hours: BusinessHours,
    /// Directory for the file-backed execution log, memory-backed when unset
    pub execution_log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: 30_000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            dedup_ttl_secs: 3_600,
            dedup_capacity: 10_000,
            worker_count: 4,
            queue_capacity: 1_024,
            max_cascade_depth: 5,
            prune_interval_secs: 300,
            business_hours: BusinessHours::default(),
            execution_log_dir: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration from defaults, environment and YAML file
    ///
    /// An unreadable or invalid YAML file is logged and skipped.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();

        match YamlConfig::load_or_default() {
            Ok(yaml_config) => match yaml_config.apply_to_config(&mut config) {
                Ok(()) => tracing::debug!("Configuration loaded with YAML overrides"),
                Err(e) => tracing::warn!(
                    "Invalid YAML configuration: {}. Continuing with environment variables and defaults.",
                    e
                ),
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to load YAML configuration, falling back to env vars and defaults: {}",
                    e
                );
            }
        }

        config
    }

    /// Load configuration from defaults, environment and an explicit YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_vars();
        YamlConfig::load_from_file(path)?.apply_to_config(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new(ENV_PREFIX);

        self.action_timeout_ms = loader.load_parsed("ACTION_TIMEOUT_MS", self.action_timeout_ms);
        self.max_attempts = loader.load_parsed("MAX_ATTEMPTS", self.max_attempts);
        self.backoff_base_ms = loader.load_parsed("BACKOFF_BASE_MS", self.backoff_base_ms);
        self.backoff_max_ms = loader.load_parsed("BACKOFF_MAX_MS", self.backoff_max_ms);
        self.dedup_ttl_secs = loader.load_parsed("DEDUP_TTL_SECS", self.dedup_ttl_secs);
        self.dedup_capacity = loader.load_parsed("DEDUP_CAPACITY", self.dedup_capacity);
        self.worker_count = loader.load_parsed("WORKER_COUNT", self.worker_count);
        self.queue_capacity = loader.load_parsed("QUEUE_CAPACITY", self.queue_capacity);
        self.max_cascade_depth = loader.load_parsed("MAX_CASCADE_DEPTH", self.max_cascade_depth);
        self.prune_interval_secs =
            loader.load_parsed("PRUNE_INTERVAL_SECS", self.prune_interval_secs);

        if let Some(dir) = loader.load_optional::<PathBuf>("EXECUTION_LOG_DIR") {
            self.execution_log_dir = Some(dir);
        }

        let hours = &mut self.business_hours;
        if let Some(start) = loader
            .load_optional::<String>("BUSINESS_HOURS_START")
            .and_then(|s| parse_time(&s).ok())
        {
            hours.start = start;
        }
        if let Some(end) = loader
            .load_optional::<String>("BUSINESS_HOURS_END")
            .and_then(|s| parse_time(&s).ok())
        {
            hours.end = end;
        }
        if let Some(days) = loader
            .load_list("BUSINESS_DAYS")
            .and_then(|days| parse_weekdays(&days).ok())
        {
            hours.weekdays = days;
        }
        hours.utc_offset_minutes =
            loader.load_parsed("BUSINESS_HOURS_UTC_OFFSET_MINUTES", hours.utc_offset_minutes);
    }

    /// Per-attempt action timeout
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Interval of the completed-instance sweep, `None` when disabled
    pub fn prune_interval(&self) -> Option<Duration> {
        (self.prune_interval_secs > 0).then(|| Duration::from_secs(self.prune_interval_secs))
    }

    /// Lifetime of a dedup entry
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    /// Find the `flowtrigger.yaml` configuration file
    ///
    /// The search order is:
    /// 1. Current working directory: `flowtrigger.yaml`
    /// 2. `~/.config/flowtrigger/flowtrigger.yaml`
    /// 3. `~/flowtrigger.yaml`
    pub fn find_yaml_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(CONFIG_FILE_NAME)];

        if let Some(home_dir) = dirs::home_dir() {
            search_paths.push(
                home_dir
                    .join(".config")
                    .join("flowtrigger")
                    .join(CONFIG_FILE_NAME),
            );
            search_paths.push(home_dir.join(CONFIG_FILE_NAME));
        }

        let found = search_paths
            .iter()
            .find_map(|path| Self::check_config_file(path));
        match &found {
            Some(path) => tracing::debug!("Found configuration file: {:?}", path),
            None => tracing::debug!("No flowtrigger.yaml configuration file found"),
        }
        found
    }

    /// Check if a configuration file exists and is readable
    pub fn check_config_file(config_path: &Path) -> Option<PathBuf> {
        match config_path.try_exists() {
            Ok(true) if config_path.is_file() => match std::fs::File::open(config_path) {
                Ok(_) => Some(config_path.to_path_buf()),
                Err(e) => {
                    tracing::warn!(
                        "Configuration file {:?} exists but cannot be read: {}",
                        config_path,
                        e
                    );
                    None
                }
            },
            Ok(false) => None,
            Ok(true) => {
                tracing::debug!("Found {:?} but it is not a file", config_path);
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Error checking for configuration file {:?}: {}",
                    config_path,
                    e
                );
                None
            }
        }
    }

    /// Validate the current configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.action_timeout_ms == 0 {
            return Err(invalid(
                "action_timeout_ms",
                self.action_timeout_ms,
                "action timeouts are mandatory and must be greater than zero",
            ));
        }
        if self.max_attempts == 0 {
            return Err(invalid(
                "max_attempts",
                self.max_attempts,
                "at least one attempt is required",
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Validation {
                message: format!(
                    "backoff_base_ms ({}) must be less than or equal to backoff_max_ms ({})",
                    self.backoff_base_ms, self.backoff_max_ms
                ),
            });
        }
        if self.dedup_capacity == 0 {
            return Err(invalid(
                "dedup_capacity",
                self.dedup_capacity,
                "the dedup cache needs room for at least one key",
            ));
        }
        if self.worker_count == 0 {
            return Err(invalid(
                "worker_count",
                self.worker_count,
                "at least one action worker is required",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(invalid(
                "queue_capacity",
                self.queue_capacity,
                "the action queue must hold at least one job",
            ));
        }
        if self.business_hours.utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            return Err(invalid(
                "business_hours.utc_offset_minutes",
                self.business_hours.utc_offset_minutes,
                "offset must lie within +/- 840 minutes",
            ));
        }
        if self.business_hours.weekdays.is_empty() {
            return Err(ConfigError::Validation {
                message: "business_hours.weekdays cannot be empty".to_string(),
            });
        }
        if self.business_hours.start == self.business_hours.end {
            return Err(ConfigError::Validation {
                message: "business_hours start and end cannot be equal".to_string(),
            });
        }
        Ok(())
    }

    /// Generate an example YAML configuration file content
    pub fn example_yaml_config() -> &'static str {
        r#"# flowtrigger.yaml
action_timeout_ms: 30000
max_attempts: 3
backoff_base_ms: 200
backoff_max_ms: 5000
dedup_ttl_secs: 3600
dedup_capacity: 10000
worker_count: 4
queue_capacity: 1024
max_cascade_depth: 5
prune_interval_secs: 300
business_hours:
  start: "09:00"
  end: "17:00"
  weekdays: [mon, tue, wed, thu, fri]
  utc_offset_minutes: 0
"#
    }
}

fn invalid(field: &str, value: impl ToString, hint: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        hint: hint.to_string(),
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| invalid("business_hours", value, "times must be written as HH:MM"))
}

fn parse_weekdays(days: &[String]) -> Result<Vec<Weekday>, ConfigError> {
    days.iter()
        .map(|day| {
            Weekday::from_str(day).map_err(|_| {
                invalid(
                    "business_hours.weekdays",
                    day,
                    "use day names such as mon, tue or Monday",
                )
            })
        })
        .collect()
}

/// Business hours section of `flowtrigger.yaml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlBusinessHours {
    /// Window start, `HH:MM`
    pub start: Option<String>,
    /// Window end, `HH:MM`
    pub end: Option<String>,
    /// Days the window applies to
    pub weekdays: Option<Vec<String>>,
    /// Offset of the business timezone from UTC
    pub utc_offset_minutes: Option<i32>,
}

/// Configuration loaded from a `flowtrigger.yaml` file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    /// See [`EngineConfig::action_timeout_ms`]
    pub action_timeout_ms: Option<u64>,
    /// See [`EngineConfig::max_attempts`]
    pub max_attempts: Option<u32>,
    /// See [`EngineConfig::backoff_base_ms`]
    pub backoff_base_ms: Option<u64>,
    /// See [`EngineConfig::backoff_max_ms`]
    pub backoff_max_ms: Option<u64>,
    /// See [`EngineConfig::dedup_ttl_secs`]
    pub dedup_ttl_secs: Option<u64>,
    /// See [`EngineConfig::dedup_capacity`]
    pub dedup_capacity: Option<usize>,
    /// See [`EngineConfig::worker_count`]
    pub worker_count: Option<usize>,
    /// See [`EngineConfig::queue_capacity`]
    pub queue_capacity: Option<usize>,
    /// See [`EngineConfig::max_cascade_depth`]
    pub max_cascade_depth: Option<u32>,
    /// See [`EngineConfig::prune_interval_secs`]
    pub prune_interval_secs: Option<u64>,
    /// See [`EngineConfig::execution_log_dir`]
    pub execution_log_dir: Option<PathBuf>,
    /// See [`EngineConfig::business_hours`]
    pub business_hours: Option<YamlBusinessHours>,
}

impl YamlConfig {
    /// Apply YAML values on top of an existing configuration
    pub fn apply_to_config(&self, config: &mut EngineConfig) -> Result<(), ConfigError> {
        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field.clone() {
                    config.$field = value;
                })*
            };
        }
        apply!(
            action_timeout_ms,
            max_attempts,
            backoff_base_ms,
            backoff_max_ms,
            dedup_ttl_secs,
            dedup_capacity,
            worker_count,
            queue_capacity,
            max_cascade_depth,
            prune_interval_secs
        );
        if let Some(dir) = &self.execution_log_dir {
            config.execution_log_dir = Some(dir.clone());
        }

        if let Some(hours) = &self.business_hours {
            if let Some(start) = &hours.start {
                config.business_hours.start = parse_time(start)?;
            }
            if let Some(end) = &hours.end {
                config.business_hours.end = parse_time(end)?;
            }
            if let Some(days) = &hours.weekdays {
                config.business_hours.weekdays = parse_weekdays(days)?;
            }
            if let Some(offset) = hours.utc_offset_minutes {
                config.business_hours.utc_offset_minutes = offset;
            }
        }
        Ok(())
    }

    /// Load YAML configuration from a file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading YAML configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the discovered YAML configuration, or an empty one if none exists
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match EngineConfig::find_yaml_config_file() {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const ENV_VARS: &[&str] = &[
        "FLOWTRIGGER_ACTION_TIMEOUT_MS",
        "FLOWTRIGGER_MAX_ATTEMPTS",
        "FLOWTRIGGER_WORKER_COUNT",
        "FLOWTRIGGER_BUSINESS_HOURS_START",
        "FLOWTRIGGER_BUSINESS_DAYS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.action_timeout_ms, 30_000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_cascade_depth, 5);
        assert_eq!(config.business_hours.weekdays.len(), 5);
        assert_eq!(config.prune_interval(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());

        let never = EngineConfig {
            prune_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(never.prune_interval(), None);
    }

    #[test]
    #[serial]
    fn test_config_new_uses_defaults_without_overrides() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp_dir.path()).unwrap();

        let config = EngineConfig::new();

        std::env::set_current_dir(original_dir).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.queue_capacity, 1_024);
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        clear_env();
        std::env::set_var("FLOWTRIGGER_ACTION_TIMEOUT_MS", "1500");
        std::env::set_var("FLOWTRIGGER_MAX_ATTEMPTS", "7");
        std::env::set_var("FLOWTRIGGER_BUSINESS_HOURS_START", "08:30");
        std::env::set_var("FLOWTRIGGER_BUSINESS_DAYS", "sat, sun");

        let mut config = EngineConfig::default();
        config.apply_env_vars();
        clear_env();

        assert_eq!(config.action_timeout(), Duration::from_millis(1500));
        assert_eq!(config.max_attempts, 7);
        assert_eq!(
            config.business_hours.start,
            NaiveTime::from_hms_opt(8, 30, 0).unwrap()
        );
        assert_eq!(config.business_hours.weekdays, vec![Weekday::Sat, Weekday::Sun]);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_keeps_default() {
        clear_env();
        std::env::set_var("FLOWTRIGGER_WORKER_COUNT", "many");
        let mut config = EngineConfig::default();
        config.apply_env_vars();
        clear_env();
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        std::env::set_var("FLOWTRIGGER_MAX_ATTEMPTS", "7");
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "max_attempts: 2\nbusiness_hours:\n  end: \"18:00\"\n  utc_offset_minutes: -300"
        )
        .unwrap();

        let config = EngineConfig::load_from_file(file.path()).unwrap();
        clear_env();

        assert_eq!(config.max_attempts, 2);
        assert_eq!(
            config.business_hours.end,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap()
        );
        assert_eq!(config.business_hours.utc_offset_minutes, -300);
    }

    #[test]
    fn test_yaml_parse_error_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_attempts: [").unwrap();
        let err = YamlConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_yaml_rejects_unknown_keys_and_bad_times() {
        assert!(serde_yaml::from_str::<YamlConfig>("retries: 3").is_err());

        let yaml: YamlConfig =
            serde_yaml::from_str("business_hours:\n  start: \"nine\"").unwrap();
        let mut config = EngineConfig::default();
        assert!(matches!(
            yaml.apply_to_config(&mut config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inconsistent_values() {
        let config = EngineConfig {
            action_timeout_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            backoff_base_ms: 10_000,
            backoff_max_ms: 100,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { .. })
        ));

        let mut config = EngineConfig::default();
        config.business_hours.utc_offset_minutes = 2_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_yaml_is_loadable() {
        let yaml: YamlConfig = serde_yaml::from_str(EngineConfig::example_yaml_config()).unwrap();
        let mut config = EngineConfig::default();
        yaml.apply_to_config(&mut config).unwrap();
        assert!(config.validate().is_ok());
    }
}
