//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use geoslice_core::{FailurePolicy, HttpConfig};
use geoslice_hda::config::{
    DEFAULT_AREA, DEFAULT_BASE_URL, DEFAULT_COLLECTION, DEFAULT_DATA_FORMAT, DEFAULT_DIMENSION,
    DEFAULT_VARIABLES,
};
use geoslice_hda::{DEFAULT_TOKEN_ENV, PollConfig, Query};
use geoslice_merge::ParquetConcat;
use serde::Deserialize;

/// Dotenv file holding the access token
const DEFAULT_ENV_FILE: &str = "keys.env";

/// Global configuration for geoslice
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub period: PeriodSection,
    pub output: OutputConfig,
    pub archive: ArchiveConfig,
    pub query: QueryConfig,
    pub workers: WorkersConfig,
    pub http: HttpSection,
    pub poll: PollSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeriodSection {
    pub start_year: i32,
    pub end_year: i32,
    /// Last day to retrieve (YYYY-MM-DD); December 31 of `end_year` if unset
    #[serde(deserialize_with = "deserialize_date")]
    pub end_date: Option<NaiveDate>,
    /// Stem of the merged artifact; `sst_<start>_<end>` if unset
    pub label: Option<String>,
}

impl Default for PeriodSection {
    fn default() -> Self {
        Self {
            start_year: 2021,
            end_year: 2021,
            end_date: None,
            label: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub partial_subdir: String,
    pub compression_level: i32,
    /// Time column the partials are concatenated along
    pub dimension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            partial_subdir: "partial".to_string(),
            compression_level: 3,
            dimension: DEFAULT_DIMENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    #[serde(deserialize_with = "deserialize_env_string")]
    pub base_url: String,
    pub collection: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    /// Dotenv file loaded before reading `token_env` (ignored if absent)
    pub env_file: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            env_file: Some(PathBuf::from(DEFAULT_ENV_FILE)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub variables: Vec<String>,
    pub data_format: String,
    /// North, West, South, East
    pub area: [f64; 4],
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            variables: DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect(),
            data_format: default_data_format().to_string(),
            area: DEFAULT_AREA,
        }
    }
}

/// The archive's native format when its merge engine is compiled in
fn default_data_format() -> &'static str {
    if cfg!(feature = "netcdf") {
        DEFAULT_DATA_FORMAT
    } else {
        ParquetConcat::FORMAT
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub default: usize,
    pub max: usize,
    /// "fail-last" or "fail-fast"
    #[serde(deserialize_with = "deserialize_policy")]
    pub failure_policy: FailurePolicy,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            default: 2,
            max: 16,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl WorkersConfig {
    /// Requested worker count clamped to `1..=max`
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        let workers = requested.unwrap_or(self.default);
        if workers > self.max {
            log::warn!("{workers} workers requested, capping at {}", self.max);
        }
        workers.clamp(1, self.max.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Seconds
    pub connect_timeout: u64,
    /// Seconds to wait for the response headers of one request
    pub request_timeout: u64,
    /// Seconds without data before a stream counts as stalled
    pub read_timeout: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub stagger_ms: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            connect_timeout: defaults.connect_timeout.as_secs(),
            request_timeout: defaults.request_timeout.as_secs(),
            read_timeout: defaults.read_timeout.as_secs(),
            max_retries: defaults.max_retries,
            retry_base_ms: defaults.retry_base_delay.as_millis() as u64,
            stagger_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_wait_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollSection {
    fn default() -> Self {
        let defaults = PollConfig::default();
        Self {
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            max_wait_secs: defaults.max_wait.as_secs(),
            max_attempts: defaults.max_attempts,
        }
    }
}

/// Per-invocation overrides from global CLI flags
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpOverrides {
    pub read_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub stagger_ms: Option<u64>,
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./geoslice.toml (current directory)
    /// 2. ~/.config/geoslice/config.toml
    ///
    /// If no config file found, returns default config. The archive env file
    /// is loaded first either way, so `${VAR}` values may come from it.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("geoslice.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "geoslice") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        let config = Self::default();
        if let Some(env_file) = &config.archive.env_file {
            load_env_file(env_file)?;
        }
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML, loading `archive.env_file` before `${VAR}` values are
    /// expanded
    fn parse(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let env_file = match table.get("archive").and_then(|a| a.get("env_file")) {
            Some(value) => value
                .as_str()
                .map(PathBuf::from)
                .context("archive.env_file must be a string")?,
            None => PathBuf::from(DEFAULT_ENV_FILE),
        };
        load_env_file(&env_file)?;
        Ok(toml::Value::Table(table).try_into()?)
    }

    pub fn http_config(&self, overrides: HttpOverrides) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.http.connect_timeout),
            request_timeout: Duration::from_secs(self.http.request_timeout),
            read_timeout: Duration::from_secs(
                overrides.read_timeout.unwrap_or(self.http.read_timeout),
            ),
            max_retries: overrides.max_retries.unwrap_or(self.http.max_retries),
            retry_base_delay: Duration::from_millis(self.http.retry_base_ms),
            stagger: Duration::from_millis(overrides.stagger_ms.unwrap_or(self.http.stagger_ms)),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            initial_delay: Duration::from_millis(self.poll.initial_delay_ms),
            max_delay: Duration::from_millis(self.poll.max_delay_ms),
            max_wait: Duration::from_secs(self.poll.max_wait_secs),
            max_attempts: self.poll.max_attempts,
        }
    }

    pub fn query(&self) -> Query {
        Query {
            collection: self.archive.collection.clone(),
            variables: self.query.variables.clone(),
            data_format: self.query.data_format.clone(),
            area: self.query.area,
        }
    }
}

/// Load `KEY=VALUE` pairs (e.g. the access token) into the environment.
/// A missing file is not an error; variables already set win.
fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            log::debug!("Loaded environment from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() => {
            log::debug!("No env file at {}", path.display());
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

/// Deserialize an optional YYYY-MM-DD date
fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    opt.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(serde::de::Error::custom))
        .transpose()
}

fn deserialize_policy<'de, D>(deserializer: D) -> Result<FailurePolicy, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    FailurePolicy::from_name(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown failure policy: {s}")))
}

/// Deserialize a string that may be an environment variable reference like ${VAR}
fn deserialize_env_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    expand_env_var(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("environment variable in {s} is not set")))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}
