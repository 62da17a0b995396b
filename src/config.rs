//! Configuration types for mineru-batch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Root configuration
///
/// Every section has defaults, so an empty JSON object (or a legacy file that
/// predates a section) loads into a working configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote API endpoint and per-call timeout
    #[serde(default)]
    pub api: ApiConfig,

    /// Where results are materialized
    #[serde(default)]
    pub output: OutputConfig,

    /// Status polling behavior
    #[serde(default)]
    pub polling: PollingConfig,

    /// Retry policy applied to transient remote failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// History database settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Default processing options for new batches
    #[serde(default)]
    pub options: ParseOptions,

    /// Task manager runtime behavior
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// A missing file yields the defaults, mirroring first-run behavior.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL '{}': {}", self.api.base_url, e),
            key: Some("api.base_url".to_string()),
        })?;

        if self.api.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request timeout must be greater than zero".to_string(),
                key: Some("api.request_timeout".to_string()),
            });
        }

        if self.polling.interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be greater than zero".to_string(),
                key: Some("polling.interval".to_string()),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry.max_attempts must be at least 1".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "backoff multiplier {} would shrink delays",
                    self.retry.backoff_multiplier
                ),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }

        if !(HISTORY_LIMIT_MIN..=HISTORY_LIMIT_MAX).contains(&self.persistence.history_limit) {
            return Err(Error::Config {
                message: format!(
                    "history limit {} outside {}..={}",
                    self.persistence.history_limit, HISTORY_LIMIT_MIN, HISTORY_LIMIT_MAX
                ),
                key: Some("persistence.history_limit".to_string()),
            });
        }

        if self.output.summary_artifact.trim().is_empty() {
            return Err(Error::Config {
                message: "summary artifact name must not be empty".to_string(),
                key: Some("output.summary_artifact".to_string()),
            });
        }

        Ok(())
    }
}

/// Smallest accepted history cap
pub const HISTORY_LIMIT_MIN: usize = 1;
/// Largest accepted history cap
pub const HISTORY_LIMIT_MAX: usize = 200;

/// Remote API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the parsing API (default: "https://mineru.net/api/v4")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound for a single remote call (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Output layout configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory; each batch lands in `<output_dir>/<remote batch id>/`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name of the document copied next to each extraction tree (default: "full.md")
    #[serde(default = "default_summary_artifact")]
    pub summary_artifact: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            summary_artifact: default_summary_artifact(),
        }
    }
}

/// Polling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Sleep between two status polls (default: 2 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Ceiling for any single delay (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// History persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "mineru-batch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Maximum number of history entries kept (default: 20)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            history_limit: default_history_limit(),
        }
    }
}

/// Task manager runtime configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Resume batches interrupted past the upload phase when the manager starts
    #[serde(default)]
    pub auto_resume: bool,

    /// Capacity of the subscriber broadcast channel (default: 1000)
    ///
    /// Subscribers further behind than this lose the oldest events.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long shutdown waits for workers to reach a terminal state (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_resume: false,
            event_buffer: default_event_buffer(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Processing options sent with each batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Run OCR on every page
    #[serde(default)]
    pub is_ocr: bool,

    /// Detect formulas
    #[serde(default = "default_true")]
    pub enable_formula: bool,

    /// Detect tables
    #[serde(default = "default_true")]
    pub enable_table: bool,

    /// Document language hint (default: "ch")
    #[serde(default = "default_language", deserialize_with = "language_or_default")]
    pub language: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            is_ocr: false,
            enable_formula: true,
            enable_table: true,
            language: default_language(),
        }
    }
}

impl ParseOptions {
    /// Replace an empty language hint with the default one
    pub fn normalized(mut self) -> Self {
        if self.language.trim().is_empty() {
            self.language = default_language();
        }
        self
    }
}

fn language_or_default<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.trim().is_empty() {
        Ok(default_language())
    } else {
        Ok(value)
    }
}

fn default_base_url() -> String {
    "https://mineru.net/api/v4".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_summary_artifact() -> String {
    "full.md".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("mineru-batch.db")
}

fn default_history_limit() -> usize {
    20
}

fn default_event_buffer() -> usize {
    1000
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_language() -> String {
    "ch".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "https://mineru.net/api/v4");
        assert_eq!(config.polling.interval, Duration::from_secs(2));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.retry.jitter);
        assert_eq!(config.persistence.history_limit, 20);
        assert_eq!(config.output.summary_artifact, "full.md");
        assert_eq!(config.options.language, "ch");
        assert!(config.options.enable_formula);
        assert!(!config.options.is_ocr);
        config.validate().unwrap();
    }

    #[test]
    fn legacy_file_without_sections_loads_with_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"output": {"output_dir": "/data/parsed"}}"#).unwrap();

        assert_eq!(config.output.output_dir, PathBuf::from("/data/parsed"));
        assert_eq!(config.output.summary_artifact, "full.md");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.options, ParseOptions::default());
    }

    #[test]
    fn empty_language_normalizes_to_default() {
        let options: ParseOptions = serde_json::from_str(r#"{"language": ""}"#).unwrap();
        assert_eq!(options.language, "ch");

        let options = ParseOptions {
            language: "  ".to_string(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(options.language, "ch");
    }

    #[test]
    fn durations_serialize_as_whole_seconds() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            ..RetryConfig::default()
        };

        let json = serde_json::to_value(&config).expect("serialize failed");

        assert_eq!(json["initial_delay"], 5);
        assert_eq!(json["max_delay"], 120);
    }

    #[test]
    fn validate_rejects_out_of_range_history_limit() {
        let mut config = Config::default();
        config.persistence.history_limit = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("persistence.history_limit"))
            }
            other => panic!("expected config error, got {other:?}"),
        }

        config.persistence.history_limit = 201;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_attempts_and_bad_url() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.api.base_url = "not a url".to_string();
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("api.base_url")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.persistence.history_limit = 50;
        config.options.is_ocr = true;
        config.runtime.auto_resume = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.persistence.history_limit, 50);
        assert!(loaded.options.is_ocr);
        assert!(loaded.runtime.auto_resume);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.persistence.history_limit, 20);
    }

    #[test]
    fn load_reports_parse_errors_as_config_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }
}
