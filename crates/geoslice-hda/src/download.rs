//! Order polling and artifact streaming

use std::io::Read;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Instant;

use geoslice_core::observer::{RetrievalEvent, RetrievalObserver};
use geoslice_core::partition::DateInterval;
use geoslice_core::retry::poll_delay;
use geoslice_core::sink::ArtifactSink;
use geoslice_core::stream::StreamError;
use geoslice_core::{CancelToken, IntervalError};

use crate::client::{ArchiveClient, error_excerpt};
use crate::config::PollConfig;
use crate::order::{Order, location_of, parse_order_status};

/// Copy buffer for streaming (64KB)
const CHUNK_SIZE: usize = 64 * 1024;

/// Waits for an [`Order`] and streams its payload into an artifact
pub struct PollingDownloader<'a> {
    client: &'a ArchiveClient,
    poll: &'a PollConfig,
    cancel: &'a CancelToken,
    observer: &'a dyn RetrievalObserver,
}

impl<'a> PollingDownloader<'a> {
    pub fn new(
        client: &'a ArchiveClient,
        poll: &'a PollConfig,
        cancel: &'a CancelToken,
        observer: &'a dyn RetrievalObserver,
    ) -> Self {
        Self {
            client,
            poll,
            cancel,
            observer,
        }
    }

    /// Write the order's payload to `target`, returning the bytes written.
    ///
    /// Nothing appears at `target` unless the whole payload arrived.
    pub fn download(
        &self,
        interval: &DateInterval,
        order: Order,
        target: &Path,
    ) -> Result<u64, IntervalError> {
        let response = match order {
            Order::Direct(response) => response,
            Order::Pending { status_url, status } => {
                self.wait_ready(interval, status_url, status)?
            }
        };
        self.stream_to(interval, response, target)
    }

    /// Poll the order until the archive answers 200.
    ///
    /// Delays grow from `initial_delay` up to `max_delay`; giving up after
    /// `max_attempts` polls or `max_wait` total. A status request that is
    /// still unanswered when `max_wait` runs out counts as a poll timeout.
    fn wait_ready(
        &self,
        interval: &DateInterval,
        mut url: String,
        mut status: String,
    ) -> Result<reqwest::Response, IntervalError> {
        let started = Instant::now();
        self.observer.on_event(&RetrievalEvent::OrderStatus {
            interval: *interval,
            status: &status,
        });

        let mut attempts = 0u32;
        loop {
            let waited = started.elapsed();
            if attempts >= self.poll.max_attempts || waited >= self.poll.max_wait {
                return Err(IntervalError::PollTimeout { attempts, waited });
            }

            let delay = poll_delay(self.poll.initial_delay, self.poll.max_delay, attempts)
                .min(self.poll.max_wait.saturating_sub(waited));
            if !self.cancel.sleep(delay) {
                return Err(IntervalError::Cancelled);
            }
            attempts += 1;

            let remaining = self.poll.max_wait.saturating_sub(started.elapsed());
            let response = match self.client.get_within(&url, remaining) {
                Ok(response) => response,
                Err(StreamError::Io(e))
                    if e.kind() == std::io::ErrorKind::TimedOut
                        && started.elapsed() >= self.poll.max_wait =>
                {
                    return Err(IntervalError::PollTimeout {
                        attempts,
                        waited: started.elapsed(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            match response.status().as_u16() {
                200 => {
                    log::debug!("{interval}: order ready after {attempts} polls");
                    return Ok(response);
                }
                202 => {
                    let next = location_of(&response);
                    let body = self.client.read_body(response)?;
                    let current = parse_order_status(&body);
                    if current != status {
                        status = current;
                        self.observer.on_event(&RetrievalEvent::OrderStatus {
                            interval: *interval,
                            status: &status,
                        });
                    }
                    if let Some(next) = next {
                        url = next;
                    }
                }
                code => {
                    let body = match self.client.read_body(response) {
                        Ok(body) => body,
                        Err(StreamError::Cancelled) => return Err(IntervalError::Cancelled),
                        Err(e) => e.to_string().into_bytes(),
                    };
                    return Err(IntervalError::Download(StreamError::Http {
                        status: Some(code),
                        message: error_excerpt(&body),
                    }));
                }
            }
        }
    }

    fn stream_to(
        &self,
        interval: &DateInterval,
        response: reqwest::Response,
        target: &Path,
    ) -> Result<u64, IntervalError> {
        let (mut reader, counter, total) = self.client.body_reader(response);
        let mut sink = ArtifactSink::create(target)?;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            if self.cancel.is_cancelled() {
                return Err(IntervalError::Cancelled);
            }
            let n = reader.read(&mut buf).map_err(StreamError::from)?;
            if n == 0 {
                break;
            }
            sink.write_chunk(&buf[..n])?;
            self.observer.on_event(&RetrievalEvent::Transfer {
                interval: *interval,
                transferred: counter.load(Ordering::Relaxed),
                total,
            });
        }

        if let Some(expected) = total {
            if sink.bytes_written() != expected {
                return Err(IntervalError::Download(StreamError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "body ended after {} of {expected} bytes",
                        sink.bytes_written()
                    ),
                ))));
            }
        }
        Ok(sink.finalize()?)
    }
}
