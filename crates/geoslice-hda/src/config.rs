//! Runtime configuration for a retrieval run

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use geoslice_core::partition::{DateInterval, PartitionError, partition};
use geoslice_core::{FailurePolicy, HttpConfig, SchedulerConfig};

pub const DEFAULT_BASE_URL: &str = "https://hda.data.destination-earth.eu";
pub const DEFAULT_COLLECTION: &str = "EO.MO.DAT.SST_GLO_SST_L4_REP_OBSERVATIONS_010_024";
pub const DEFAULT_VARIABLES: [&str; 4] = [
    "analysed_sst",
    "analysed_sst_uncertainty",
    "mask",
    "sea_ice_fraction",
];
/// Format the archive serves this collection in
pub const DEFAULT_DATA_FORMAT: &str = "netcdf";
/// North, West, South, East
pub const DEFAULT_AREA: [f64; 4] = [67.8, -44.8, -21.8, 44.8];
/// Name of the time dimension the partials are concatenated along
pub const DEFAULT_DIMENSION: &str = "time";

/// Which dates to retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodConfig {
    pub start_year: i32,
    pub end_year: i32,
    /// Explicit last day; defaults to December 31 of `end_year`
    pub end_date: Option<NaiveDate>,
}

impl PeriodConfig {
    pub fn years(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year,
            end_year,
            end_date: None,
        }
    }

    /// Inclusive `(start, end)` of the period
    pub fn bounds(&self) -> Result<(NaiveDate, NaiveDate), PartitionError> {
        let start = NaiveDate::from_ymd_opt(self.start_year, 1, 1)
            .ok_or_else(|| PartitionError::OutOfRange(format!("year {}", self.start_year)))?;
        let end = match self.end_date {
            Some(end) => end,
            None => NaiveDate::from_ymd_opt(self.end_year, 12, 31)
                .ok_or_else(|| PartitionError::OutOfRange(format!("year {}", self.end_year)))?,
        };
        Ok((start, end))
    }

    /// Month-third intervals covering the period, in chronological order
    pub fn intervals(&self) -> Result<Vec<DateInterval>, PartitionError> {
        let (start, end) = self.bounds()?;
        if let Some(explicit) = self.end_date {
            let year_end = NaiveDate::from_ymd_opt(self.end_year, 12, 31);
            if year_end.is_some_and(|year_end| explicit < year_end) {
                log::warn!(
                    "end_date {explicit} stops before the end of {}; later dates are not retrieved",
                    self.end_year
                );
            }
        }
        partition(start, end)
    }
}

/// What to search for
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub variables: Vec<String>,
    pub data_format: String,
    /// North, West, South, East
    pub area: [f64; 4],
}

impl Default for Query {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            variables: DEFAULT_VARIABLES.iter().map(|v| v.to_string()).collect(),
            data_format: DEFAULT_DATA_FORMAT.to_string(),
            area: DEFAULT_AREA,
        }
    }
}

/// Bounds on waiting for an asynchronous order
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the first poll; doubles per attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total time an order may stay pending
    pub max_wait: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_wait: Duration::from_secs(2 * 60 * 60),
            max_attempts: 500,
        }
    }
}

/// Everything a pipeline run needs besides credentials
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub period: PeriodConfig,
    /// Stem of the merged artifact
    pub label: String,
    pub output_dir: PathBuf,
    /// Subdirectory of `output_dir` holding partial artifacts
    pub partial_subdir: String,
    pub workers: usize,
    pub base_url: String,
    pub query: Query,
    pub http: HttpConfig,
    pub poll: PollConfig,
    pub failure_policy: FailurePolicy,
}

impl PipelineConfig {
    pub fn new(period: PeriodConfig, output_dir: impl Into<PathBuf>) -> Self {
        let label = format!("sst_{}_{}", period.start_year, period.end_year);
        Self {
            period,
            label,
            output_dir: output_dir.into(),
            partial_subdir: "partial".to_string(),
            workers: 4,
            base_url: DEFAULT_BASE_URL.to_string(),
            query: Query::default(),
            http: HttpConfig::default(),
            poll: PollConfig::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.output_dir.join(&self.partial_subdir)
    }

    pub fn merged_path(&self, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{extension}", self.label))
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            failure_policy: self.failure_policy,
            max_retries: self.http.max_retries,
            retry_base_delay: self.http.retry_base_delay,
            stagger: self.http.stagger,
        }
    }
}
