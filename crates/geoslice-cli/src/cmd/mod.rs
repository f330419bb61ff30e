//! Subcommands

pub mod fetch;
pub mod merge;
pub mod status;

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use geoslice_hda::{EnvToken, PeriodConfig, PipelineConfig};
use geoslice_merge::{ConcatEngine, ParquetConcat};

use crate::config::{Config, HttpOverrides};

/// Period and output selection shared by every pipeline subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct PeriodArgs {
    /// First year to retrieve
    #[arg(long)]
    pub start_year: Option<i32>,

    /// Last year to retrieve (inclusive)
    #[arg(long)]
    pub end_year: Option<i32>,

    /// Stop at this day instead of December 31 of the end year (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end_date: Option<NaiveDate>,

    /// Stem of the merged artifact
    #[arg(short, long)]
    pub label: Option<String>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl PeriodArgs {
    /// Merge CLI flags over the config file into a runnable pipeline config
    pub fn pipeline_config(&self, config: &Config, http: HttpOverrides) -> PipelineConfig {
        let start_year = self.start_year.unwrap_or(config.period.start_year);
        let end_year = self.end_year.unwrap_or(config.period.end_year);
        // A configured end date belongs to the configured end year
        let end_date = self.end_date.or(if self.end_year.is_some() {
            None
        } else {
            config.period.end_date
        });

        let period = PeriodConfig {
            start_year,
            end_year,
            end_date,
        };
        let output_dir = self
            .output
            .clone()
            .unwrap_or_else(|| config.output.dir.clone());

        let mut pipeline = PipelineConfig::new(period, output_dir);
        if let Some(label) = self.label.as_ref().or(config.period.label.as_ref()) {
            pipeline.label = label.clone();
        }
        pipeline.partial_subdir = config.output.partial_subdir.clone();
        pipeline.workers = config.workers.resolve(None);
        pipeline.base_url = config.archive.base_url.clone();
        pipeline.query = config.query();
        pipeline.http = config.http_config(http);
        pipeline.poll = config.poll_config();
        pipeline.failure_policy = config.workers.failure_policy;
        pipeline
    }
}

/// Merge engine for the configured `[query] data_format`
pub fn concat_engine(config: &Config) -> Result<Box<dyn ConcatEngine>> {
    let dimension = config.output.dimension.clone();
    match config.query.data_format.as_str() {
        ParquetConcat::FORMAT => Ok(Box::new(
            ParquetConcat::new(dimension).with_zstd_level(config.output.compression_level),
        )),
        #[cfg(feature = "netcdf")]
        geoslice_merge::NetcdfConcat::FORMAT => {
            Ok(Box::new(geoslice_merge::NetcdfConcat::new(dimension)))
        }
        #[cfg(not(feature = "netcdf"))]
        "netcdf" => bail!(
            "data_format \"netcdf\" needs geoslice built with --features netcdf; \
             set [query] data_format = \"parquet\" to use the Parquet engine"
        ),
        other => bail!("unsupported data_format \"{other}\" (expected netcdf or parquet)"),
    }
}

pub fn credentials(config: &Config) -> EnvToken {
    EnvToken::new(config.archive.token_env.clone())
}

pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date format: {e}"))
}

pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

/// Human-readable byte count (binary units)
pub fn fmt_bytes(bytes: u64) -> String {
    indicatif::HumanBytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoslice_core::FailurePolicy;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn defaults_come_from_config() {
        let config = Config::default();
        let pipeline = PeriodArgs::default().pipeline_config(&config, HttpOverrides::default());
        assert_eq!(pipeline.period.start_year, 2021);
        assert_eq!(pipeline.period.end_year, 2021);
        assert_eq!(pipeline.label, "sst_2021_2021");
        assert_eq!(pipeline.output_dir, PathBuf::from("./data"));
        assert_eq!(pipeline.partial_dir(), PathBuf::from("./data/partial"));
        assert_eq!(pipeline.workers, 2);
        assert_eq!(pipeline.failure_policy, FailurePolicy::FailLast);
    }

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.period.label = Some("from_file".to_string());
        config.period.end_date = Some(d(2021, 3, 31));

        let args = PeriodArgs {
            start_year: Some(2019),
            end_year: Some(2020),
            label: Some("SST".to_string()),
            output: Some(PathBuf::from("/tmp/out")),
            ..Default::default()
        };
        let pipeline = args.pipeline_config(&config, HttpOverrides::default());
        assert_eq!(pipeline.period.start_year, 2019);
        // Overriding the end year drops the configured end date
        assert_eq!(pipeline.period.end_date, None);
        assert_eq!(pipeline.label, "SST");
        assert_eq!(
            pipeline.merged_path("parquet"),
            PathBuf::from("/tmp/out/SST.parquet")
        );
    }

    #[test]
    fn configured_end_date_kept_without_end_year_flag() {
        let mut config = Config::default();
        config.period.end_date = Some(d(2021, 3, 31));
        let pipeline = PeriodArgs::default().pipeline_config(&config, HttpOverrides::default());
        assert_eq!(pipeline.period.end_date, Some(d(2021, 3, 31)));
        assert_eq!(pipeline.period.intervals().unwrap().len(), 9);
    }

    #[test]
    fn engine_follows_data_format() {
        let mut config = Config::default();
        config.query.data_format = "parquet".to_string();
        let engine = concat_engine(&config).unwrap();
        assert_eq!(engine.extension(), "parquet");
        assert_eq!(engine.data_format(), "parquet");

        config.query.data_format = "grib".to_string();
        assert!(concat_engine(&config).is_err());
    }

    #[cfg(feature = "netcdf")]
    #[test]
    fn netcdf_engine_is_available() {
        let mut config = Config::default();
        config.query.data_format = "netcdf".to_string();
        assert_eq!(concat_engine(&config).unwrap().extension(), "nc");
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn netcdf_without_feature_explains_rebuild() {
        let mut config = Config::default();
        config.query.data_format = "netcdf".to_string();
        let err = concat_engine(&config).err().unwrap();
        assert!(err.to_string().contains("--features netcdf"));
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert_eq!(parse_date("2021-01-31"), Ok(d(2021, 1, 31)));
        assert!(parse_date("31.01.2021").is_err());
    }
}
