//! Merge subcommand - concatenate an already complete partial directory

use anyhow::Result;
use clap::Args;

use geoslice_core::fmt_num;
use geoslice_hda::Pipeline;

use super::{PeriodArgs, concat_engine, credentials, print_summary};
use crate::config::{Config, HttpOverrides};

#[derive(Args, Debug)]
pub struct MergeArgs {
    #[command(flatten)]
    pub period: PeriodArgs,
}

pub fn run(args: MergeArgs, config: &Config, http: HttpOverrides) -> Result<()> {
    let pipeline_config = args.period.pipeline_config(config, http);
    let engine = concat_engine(config)?;
    let creds = credentials(config);
    let pipeline = Pipeline::new(&pipeline_config, &creds, engine.as_ref());
    let merged_path = pipeline.merged_path();

    log::info!(
        "Merging {} along '{}' into {}",
        pipeline_config.partial_dir().display(),
        config.output.dimension,
        merged_path.display()
    );

    let stats = pipeline.merge_only()?;

    print_summary(
        "Merge",
        &[
            ("Inputs", stats.inputs.to_string()),
            ("Rows", fmt_num(stats.rows)),
            ("Output", merged_path.display().to_string()),
            ("Time", format!("{:.1}s", stats.elapsed.as_secs_f64())),
        ],
    );

    Ok(())
}
