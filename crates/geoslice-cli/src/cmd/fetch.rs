//! Fetch subcommand - retrieve every missing interval, then merge

use anyhow::Result;
use clap::Args;

use geoslice_core::{CancelToken, FailurePolicy, ProgressObserver, SharedProgress, fmt_num};
use geoslice_hda::Pipeline;

use super::{PeriodArgs, concat_engine, credentials, fmt_bytes, print_summary};
use crate::config::{Config, HttpOverrides};

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub period: PeriodArgs,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Stop claiming new intervals after the first permanent failure
    #[arg(long)]
    pub fail_fast: bool,
}

pub fn run(
    args: FetchArgs,
    config: &Config,
    http: HttpOverrides,
    progress: &SharedProgress,
    cancel: &CancelToken,
) -> Result<()> {
    let mut pipeline_config = args.period.pipeline_config(config, http);
    pipeline_config.workers = config.workers.resolve(args.workers);
    if args.fail_fast {
        pipeline_config.failure_policy = FailurePolicy::FailFast;
    }

    let engine = concat_engine(config)?;
    let creds = credentials(config);
    let observer = ProgressObserver::new(progress.clone());
    let pipeline = Pipeline::new(&pipeline_config, &creds, engine.as_ref())
        .with_observer(&observer)
        .with_cancel(cancel.clone());

    log::info!(
        "Fetching {} ({} to {})",
        pipeline_config.query.collection,
        pipeline_config.period.start_year,
        pipeline_config.period.end_year
    );
    log::info!("  Output: {}", pipeline_config.output_dir.display());
    log::info!(
        "  Workers: {} ({})",
        pipeline_config.workers,
        pipeline_config.failure_policy
    );

    let summary = pipeline.run()?;

    print_summary(
        "Fetch",
        &[
            (
                "Intervals",
                format!(
                    "{} ({} downloaded, {} already present)",
                    summary.intervals, summary.downloaded, summary.skipped
                ),
            ),
            ("Downloaded", fmt_bytes(summary.bytes)),
            (
                "Retrieval time",
                format!("{:.1}s", summary.retrieval_time.as_secs_f64()),
            ),
            (
                "Merge time",
                format!("{:.1}s", summary.merge.elapsed.as_secs_f64()),
            ),
            ("Rows", fmt_num(summary.merge.rows)),
            ("Output", summary.merged_path.display().to_string()),
            ("Total time", format!("{:.1}s", summary.total_time.as_secs_f64())),
        ],
    );

    Ok(())
}
