//! Status subcommand - which intervals are already on disk

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use geoslice_hda::Pipeline;

use super::{PeriodArgs, concat_engine, credentials, print_summary};
use crate::config::{Config, HttpOverrides};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub period: PeriodArgs,

    /// List only intervals that still need retrieval
    #[arg(long)]
    pub pending: bool,
}

pub fn run(args: StatusArgs, config: &Config, http: HttpOverrides) -> Result<()> {
    let pipeline_config = args.period.pipeline_config(config, http);
    let engine = concat_engine(config)?;
    let creds = credentials(config);
    let pipeline = Pipeline::new(&pipeline_config, &creds, engine.as_ref());

    let plan = pipeline.plan()?;
    let done = plan.iter().filter(|s| s.done).count();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Interval").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Artifact").fg(Color::Cyan),
        ]);
    for status in plan.iter().filter(|s| !(args.pending && s.done)) {
        let state = if status.done {
            Cell::new("done").fg(Color::Green)
        } else {
            Cell::new("pending").fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(status.interval),
            state,
            Cell::new(status.path.display()),
        ]);
    }
    eprintln!("\n{table}");

    let merged_path = pipeline.merged_path();
    print_summary(
        "Status",
        &[
            ("Done", format!("{done}/{}", plan.len())),
            ("Pending", (plan.len() - done).to_string()),
            (
                "Merged",
                if merged_path.exists() {
                    merged_path.display().to_string()
                } else {
                    "not yet".to_string()
                },
            ),
        ],
    );

    Ok(())
}
