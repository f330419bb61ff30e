//! Common error type for per-interval retrieval

use std::time::Duration;

use crate::retry::Retryable;
use crate::stream::{StreamError, is_retryable_status};

/// Error from retrieving a single date interval (search + order + download).
///
/// Isolated per interval: the scheduler collects these instead of aborting
/// the other workers.
#[derive(Debug)]
pub enum IntervalError {
    /// Search returned zero features
    NoMatch,
    /// Search answered with an error status or an unexpected document
    SearchProtocol {
        status: Option<u16>,
        message: String,
    },
    /// Download link answered with neither 200 nor a pollable 202
    DownloadInitiation { status: u16, message: String },
    /// Order did not become ready within the polling bounds
    PollTimeout { attempts: u32, waited: Duration },
    /// Network/HTTP failure while polling or streaming
    Download(StreamError),
    /// Local I/O error writing the artifact
    Io(std::io::Error),
    /// Cancellation was requested while the interval was in flight
    Cancelled,
}

impl std::fmt::Display for IntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatch => write!(f, "no matching products found"),
            Self::SearchProtocol {
                status: Some(s),
                message,
            } => write!(f, "search failed (HTTP {s}): {message}"),
            Self::SearchProtocol {
                status: None,
                message,
            } => write!(f, "search failed: {message}"),
            Self::DownloadInitiation { status, message } => {
                write!(f, "download initiation failed (HTTP {status}): {message}")
            }
            Self::PollTimeout { attempts, waited } => write!(
                f,
                "order not ready after {attempts} polls ({:.1}s)",
                waited.as_secs_f64()
            ),
            Self::Download(e) => write!(f, "download failed: {e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for IntervalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Download(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StreamError> for IntervalError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Cancelled => Self::Cancelled,
            e => Self::Download(e),
        }
    }
}

impl From<std::io::Error> for IntervalError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl Retryable for IntervalError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::SearchProtocol { status, .. } => is_retryable_status(*status),
            Self::DownloadInitiation { status, .. } => is_retryable_status(Some(*status)),
            Self::Download(e) => e.is_retryable(),
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
            Self::NoMatch | Self::PollTimeout { .. } | Self::Cancelled => false,
        }
    }
}
