//! HTTP plumbing: shared runtime, client construction, streaming body reader.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync interface for compatibility with rayon workers.

use std::io::{self, Read};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::task::Context;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};

use crate::cancel::CancelToken;

/// HTTP behaviour shared by every request of a run
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Longest wait for response headers of a single request
    pub request_timeout: Duration,
    /// No data within this window while streaming = stall
    pub read_timeout: Duration,
    /// Retry attempts per interval for transient failures
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff
    pub retry_base_delay: Duration,
    /// Delay between parallel worker starts
    pub stagger: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            read_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            stagger: Duration::ZERO,
        }
    }
}

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error
    Io(std::io::Error),
    /// Abandoned because the run was cancelled
    Cancelled,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for StreamError {}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    /// Status code, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            Self::Io(_) | Self::Cancelled => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => is_retryable_status(*status),
            Self::Io(e) => {
                // Disk full is not retryable, timeout IS retryable
                e.kind() != std::io::ErrorKind::StorageFull
            }
            Self::Cancelled => false,
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        // Unwrap the marker a cancelled body read carries
        if e.get_ref().is_some_and(|inner| inner.is::<StreamError>()) {
            return Self::Cancelled;
        }
        Self::Io(e)
    }
}

/// Transport failures (no status), 408, 429 and 5xx are transient; other
/// statuses are answers that will not change on retry.
pub fn is_retryable_status(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(s) => matches!(s, 408 | 429 | 500..=599),
    }
}

/// Build an async HTTP client with connection pooling.
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client, StreamError> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .pool_max_idle_per_host(8)
        .build()
        .map_err(|e| StreamError::from_reqwest(&e))
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Drive a future to completion on the shared runtime from a sync worker
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    SHARED_RUNTIME.handle().block_on(future)
}

/// Send a request and wait for its response headers.
///
/// Gives up with `TimedOut` after `limit` and with [`StreamError::Cancelled`]
/// as soon as `cancel` fires, so a silent server never pins a worker.
pub fn send(
    request: reqwest::RequestBuilder,
    limit: Duration,
    cancel: &CancelToken,
) -> Result<reqwest::Response, StreamError> {
    if cancel.is_cancelled() {
        return Err(StreamError::Cancelled);
    }
    block_on(async {
        tokio::select! {
            result = tokio::time::timeout(limit, request.send()) => match result {
                Ok(response) => response.map_err(|e| StreamError::from_reqwest(&e)),
                Err(_) => Err(StreamError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no response within {:.1}s", limit.as_secs_f64()),
                ))),
            },
            () = cancel.cancelled() => Err(StreamError::Cancelled),
        }
    })
}

/// Shared byte counter for progress tracking
pub type ByteCounter = Arc<AtomicU64>;

/// Sync reader over an HTTP response body with stall detection and byte counting
pub type BodyReader = CountingReader<TimeoutReader>;

/// Parse `Content-Length`; absent or malformed means unknown, not zero
pub fn content_length(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Turn a response into a sync body reader.
///
/// Returns (reader, byte_counter, total_bytes)
pub fn open_body_reader(
    response: reqwest::Response,
    read_timeout: Duration,
    cancel: &CancelToken,
) -> (BodyReader, ByteCounter, Option<u64>) {
    let total_bytes = content_length(response.headers());

    let stream = response.bytes_stream();
    let async_reader =
        tokio_util::io::StreamReader::new(stream.map(|result| result.map_err(io::Error::other)));

    let counter = Arc::new(AtomicU64::new(0));
    let reader = CountingReader {
        inner: TimeoutReader::new(Box::pin(async_reader), read_timeout, cancel.clone()),
        count: counter.clone(),
    };
    (reader, counter, total_bytes)
}

/// Reader wrapper that tracks bytes read
pub struct CountingReader<R> {
    inner: R,
    count: ByteCounter,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, count: ByteCounter) -> Self {
        Self { inner, count }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Async-to-sync bridge with read timeout.
///
/// Wraps an async reader and provides sync Read interface.
/// Each read operation has a timeout - if no data arrives within
/// `timeout`, returns TimedOut error (which triggers retry). A pending read
/// also ends as soon as the cancel token fires.
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
    timeout: Duration,
    cancel: CancelToken,
}

impl TimeoutReader {
    fn new(
        inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            inner,
            timeout,
            cancel,
        }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        let cancel = self.cancel.clone();
        let inner = &mut self.inner;
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    inner.as_mut().poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            tokio::select! {
                result = tokio::time::timeout(timeout, read_future) => match result {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("read timeout ({}s with no data)", timeout.as_secs()),
                    )),
                },
                () = cancel.cancelled() => Err(io::Error::other(StreamError::Cancelled)),
            }
        })
    }
}
