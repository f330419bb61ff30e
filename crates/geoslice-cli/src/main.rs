//! geoslice - partitioned retrieval of sea surface temperature archives
//!
//! Splits a multi-year period into ten-day intervals, orders each one from
//! the HDA STAC archive in parallel and merges the partial artifacts along
//! the time dimension.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};

use geoslice_core::CancelToken;
use geoslice_hda::RunError;

mod cmd;
mod config;

use config::{Config, HttpOverrides};

/// Exit status after an interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "geoslice")]
#[command(about = "Partitioned concurrent retrieval of SST archives")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./geoslice.toml or ~/.config/geoslice/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum retry attempts for transient failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Milliseconds between parallel worker starts
    #[arg(long, global = true)]
    stagger_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve missing intervals and merge them
    Fetch(cmd::fetch::FetchArgs),
    /// Merge existing partial artifacts only
    Merge(cmd::merge::MergeArgs),
    /// Show which intervals are already retrieved
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) => {
            log::warn!("Interrupted; completed intervals are kept for the next run");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(geoslice_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; progress bars show activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    geoslice_core::init_logging(quiet, cli.debug, multi).context("Failed to install logger")?;

    let config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    let http = HttpOverrides {
        read_timeout: cli.read_timeout,
        max_retries: cli.max_retries,
        stagger_ms: cli.stagger_ms,
    };

    match cli.command {
        Command::Fetch(args) => {
            let cancel = CancelToken::new();
            install_signal_handlers(&cancel)?;
            cmd::fetch::run(args, &config, http, &progress, &cancel)
        }
        Command::Merge(args) => cmd::merge::run(args, &config, http),
        Command::Status(args) => cmd::status::run(args, &config, http),
        Command::Config => {
            print_config(&config, http);
            Ok(())
        }
    }
}

/// First SIGINT/SIGTERM cancels the run; a second one exits immediately
fn install_signal_handlers(cancel: &CancelToken) -> Result<()> {
    let flag = cancel.flag();
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(
            sig,
            i32::from(EXIT_INTERRUPTED),
            flag.clone(),
        )
        .context("Failed to register signal handler")?;
        signal_hook::flag::register(sig, flag.clone())
            .context("Failed to register signal handler")?;
    }
    Ok(())
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    e.downcast_ref::<RunError>()
        .is_some_and(RunError::is_cancelled)
}

fn print_config(config: &Config, http: HttpOverrides) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let http = config.http_config(http);
    let poll = config.poll_config();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let period = match config.period.end_date {
        Some(end) => format!("{} to {end}", config.period.start_year),
        None => format!("{} to {}", config.period.start_year, config.period.end_year),
    };
    table.add_row(vec!["Period", &period]);
    table.add_row(vec![
        "Label",
        config.period.label.as_deref().unwrap_or("(derived from years)"),
    ]);
    table.add_row(vec![
        "Output directory",
        &config.output.dir.display().to_string(),
    ]);
    table.add_row(vec!["Partial subdirectory", &config.output.partial_subdir]);
    table.add_row(vec![
        "Compression level",
        &config.output.compression_level.to_string(),
    ]);
    table.add_row(vec!["Merge dimension", &config.output.dimension]);
    table.add_row(vec![
        "Workers",
        &format!(
            "{} (max: {}, {})",
            config.workers.default, config.workers.max, config.workers.failure_policy
        ),
    ]);
    table.add_row(vec!["Archive URL", &config.archive.base_url]);
    table.add_row(vec!["Collection", &config.archive.collection]);
    table.add_row(vec!["Variables", &config.query.variables.join(", ")]);
    table.add_row(vec!["Data format", &config.query.data_format]);
    table.add_row(vec!["Area (N, W, S, E)", &format!("{:?}", config.query.area)]);
    table.add_row(vec![
        "Access token",
        if std::env::var(&config.archive.token_env).is_ok_and(|v| !v.trim().is_empty()) {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec![
        "Request timeout",
        &format!("{}s", http.request_timeout.as_secs()),
    ]);
    table.add_row(vec![
        "Read timeout",
        &format!("{}s", http.read_timeout.as_secs()),
    ]);
    table.add_row(vec!["Max retries", &http.max_retries.to_string()]);
    table.add_row(vec!["Stagger", &format!("{}ms", http.stagger.as_millis())]);
    table.add_row(vec![
        "Polling",
        &format!(
            "{}ms..{}ms, max {} polls / {}s",
            poll.initial_delay.as_millis(),
            poll.max_delay.as_millis(),
            poll.max_attempts,
            poll.max_wait.as_secs()
        ),
    ]);

    eprintln!("\n{table}");
}
