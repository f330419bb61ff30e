//! Retrieval events and observers.
//!
//! The pipeline reports progress through [`RetrievalObserver`] instead of
//! printing, so callers pick the output medium (log lines, progress bars,
//! test recorders).

use std::path::Path;
use std::time::Duration;

use indicatif::HumanBytes;

use crate::error::IntervalError;
use crate::partition::DateInterval;

/// Something observable that happened to one interval
#[derive(Debug)]
pub enum RetrievalEvent<'a> {
    /// Artifact already on disk, no work scheduled
    Skipped {
        interval: DateInterval,
        path: &'a Path,
    },
    /// A worker claimed the interval
    Started { interval: DateInterval },
    /// Asynchronous order reported a new status (only emitted on change)
    OrderStatus {
        interval: DateInterval,
        status: &'a str,
    },
    /// Bytes streamed so far; `total` is unknown without Content-Length
    Transfer {
        interval: DateInterval,
        transferred: u64,
        total: Option<u64>,
    },
    /// Artifact published
    Completed {
        interval: DateInterval,
        bytes: u64,
        elapsed: Duration,
    },
    /// Interval failed permanently (after retries)
    Failed {
        interval: DateInterval,
        error: &'a IntervalError,
    },
}

impl RetrievalEvent<'_> {
    pub fn interval(&self) -> DateInterval {
        match self {
            Self::Skipped { interval, .. }
            | Self::Started { interval }
            | Self::OrderStatus { interval, .. }
            | Self::Transfer { interval, .. }
            | Self::Completed { interval, .. }
            | Self::Failed { interval, .. } => *interval,
        }
    }
}

/// Receives retrieval events from any worker thread
pub trait RetrievalObserver: Send + Sync {
    fn on_event(&self, event: &RetrievalEvent<'_>);
}

/// Observer that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RetrievalObserver for NoopObserver {
    fn on_event(&self, _event: &RetrievalEvent<'_>) {}
}

/// Observer that reports through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RetrievalObserver for LogObserver {
    fn on_event(&self, event: &RetrievalEvent<'_>) {
        match event {
            RetrievalEvent::Skipped { interval, path } => {
                log::debug!("{interval}: {} exists, skipping", path.display());
            }
            RetrievalEvent::Started { interval } => {
                log::info!("{interval}: searching");
            }
            RetrievalEvent::OrderStatus { interval, status } => {
                log::info!("{interval}: order status: {status}");
            }
            RetrievalEvent::Transfer {
                interval,
                transferred,
                total,
            } => match total {
                Some(total) => log::trace!(
                    "{interval}: {}/{}",
                    HumanBytes(*transferred),
                    HumanBytes(*total)
                ),
                None => log::trace!("{interval}: {}", HumanBytes(*transferred)),
            },
            RetrievalEvent::Completed {
                interval,
                bytes,
                elapsed,
            } => {
                log::info!(
                    "{interval}: {} in {:.1}s",
                    HumanBytes(*bytes),
                    elapsed.as_secs_f64()
                );
            }
            RetrievalEvent::Failed { interval, error } => {
                log::warn!("{interval}: {error}");
            }
        }
    }
}
