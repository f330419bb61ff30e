//! Resume-aware scheduling of interval retrievals over a bounded worker pool.
//!
//! An interval is done iff its artifact file exists. Remaining intervals are
//! claimed from a [`WorkQueue`] by `pool.current_num_threads()` workers.
//! Results are indexed by partition position, never by completion order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::IntervalError;
use crate::observer::{RetrievalEvent, RetrievalObserver};
use crate::partition::DateInterval;
use crate::retry::retry_with_backoff;
use crate::work_queue::WorkQueue;

/// How often a staggered worker checks whether work is left
const STAGGER_POLL: Duration = Duration::from_millis(50);

/// What to do when an interval fails permanently
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let every other interval finish, then report all failures
    #[default]
    FailLast,
    /// Cancel in-flight work and stop claiming intervals on the first failure
    FailFast,
}

impl FailurePolicy {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "fail-last" => Some(Self::FailLast),
            "fail-fast" => Some(Self::FailFast),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FailLast => "fail-last",
            Self::FailFast => "fail-fast",
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling knobs
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub failure_policy: FailurePolicy,
    /// Retry attempts for retryable interval errors
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Delay between worker starts (worker `n` waits `n * stagger`)
    pub stagger: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::FailLast,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            stagger: Duration::ZERO,
        }
    }
}

/// Where partial artifacts live: `<dir>/<start-date>.<extension>`
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
    dir: PathBuf,
    extension: String,
}

impl ArtifactLayout {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn path_for(&self, interval: &DateInterval) -> PathBuf {
        self.dir.join(interval.artifact_name(&self.extension))
    }

    /// Existence is the only completion signal
    pub fn is_done(&self, interval: &DateInterval) -> bool {
        self.path_for(interval).exists()
    }

    /// Artifact paths for every interval, in partition order
    pub fn paths(&self, intervals: &[DateInterval]) -> Vec<PathBuf> {
        intervals.iter().map(|iv| self.path_for(iv)).collect()
    }
}

/// Retrieves one interval into `target`, returning the bytes written
pub trait IntervalTask: Sync {
    fn retrieve(&self, interval: &DateInterval, target: &Path) -> Result<u64, IntervalError>;
}

impl<F> IntervalTask for F
where
    F: Fn(&DateInterval, &Path) -> Result<u64, IntervalError> + Sync,
{
    fn retrieve(&self, interval: &DateInterval, target: &Path) -> Result<u64, IntervalError> {
        self(interval, target)
    }
}

/// Successful scheduling result
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Artifact path of every interval of the partition, in partition order
    pub artifacts: Vec<PathBuf>,
    /// Intervals whose artifact already existed
    pub skipped: usize,
    /// Intervals downloaded by this run
    pub downloaded: usize,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// One permanently failed interval
#[derive(Debug)]
pub struct IntervalFailure {
    /// Position in the partition
    pub index: usize,
    pub interval: DateInterval,
    pub error: IntervalError,
}

/// Aggregate failure of the retrieval phase
#[derive(Debug)]
pub struct RetrievalFailure {
    /// Size of the full partition
    pub total: usize,
    /// Failed intervals, in partition order
    pub failures: Vec<IntervalFailure>,
    /// Pending intervals never started (fail-fast or cancellation)
    pub not_attempted: usize,
    /// Whether the shared cancel token was set when the run ended
    pub cancelled: bool,
}

impl RetrievalFailure {
    pub fn failed_intervals(&self) -> Vec<DateInterval> {
        self.failures.iter().map(|f| f.interval).collect()
    }
}

impl std::fmt::Display for RetrievalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} intervals failed",
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.interval, failure.error)?;
        }
        if self.not_attempted > 0 {
            write!(f, "\n  {} intervals not attempted", self.not_attempted)?;
        }
        Ok(())
    }
}

impl std::error::Error for RetrievalFailure {}

/// Staggered worker start. Returns `false` if the worker should not start
/// because of cancellation or because the queue drained while it waited.
fn wait_turn<S>(delay: Duration, queue: &WorkQueue<S>, cancel: &CancelToken) -> bool {
    let deadline = Instant::now().checked_add(delay);
    loop {
        if queue.claimed() >= queue.total() {
            return false;
        }
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return true;
                }
                STAGGER_POLL.min(deadline - now)
            }
            None => STAGGER_POLL,
        };
        if !cancel.sleep(slice) {
            return false;
        }
    }
}

/// Download every interval lacking an artifact, with bounded concurrency.
///
/// Returns only after all dispatched work has terminated. On success the
/// outcome lists the artifact of every interval (pre-existing ones included)
/// in partition order.
pub fn run_schedule<T: IntervalTask>(
    intervals: &[DateInterval],
    layout: &ArtifactLayout,
    config: &SchedulerConfig,
    pool: &rayon::ThreadPool,
    cancel: &CancelToken,
    observer: &dyn RetrievalObserver,
    task: &T,
) -> Result<ScheduleOutcome, RetrievalFailure> {
    let start = Instant::now();
    let artifacts = layout.paths(intervals);

    let mut pending = Vec::new();
    for (idx, (interval, path)) in intervals.iter().zip(&artifacts).enumerate() {
        if path.exists() {
            observer.on_event(&RetrievalEvent::Skipped {
                interval: *interval,
                path,
            });
        } else {
            pending.push((idx, *interval));
        }
    }
    let skipped = intervals.len() - pending.len();
    log::info!(
        "{} intervals: {skipped} already downloaded, {} pending",
        intervals.len(),
        pending.len()
    );

    let queue = WorkQueue::new(pending);
    let failures: Mutex<Vec<IntervalFailure>> = Mutex::new(Vec::new());
    let downloaded = AtomicUsize::new(0);
    let bytes = AtomicU64::new(0);

    if queue.total() > 0 {
        let workers = pool.current_num_threads().min(queue.total()).max(1);
        log::debug!("Dispatching {} intervals to {workers} workers", queue.total());

        pool.install(|| {
            rayon::scope(|s| {
                for worker in 0..workers {
                    let queue = &queue;
                    let failures = &failures;
                    let downloaded = &downloaded;
                    let bytes = &bytes;
                    let artifacts = &artifacts;
                    s.spawn(move |_| {
                        let stagger = config
                            .stagger
                            .saturating_mul(u32::try_from(worker).unwrap_or(u32::MAX));
                        if !stagger.is_zero() && !wait_turn(stagger, queue, cancel) {
                            return;
                        }
                        while !cancel.is_cancelled() {
                            let Some(&(index, interval)) = queue.next() else {
                                break;
                            };
                            let target = &artifacts[index];
                            observer.on_event(&RetrievalEvent::Started { interval });

                            let attempt_start = Instant::now();
                            let result = retry_with_backoff(
                                &interval.to_string(),
                                config.max_retries,
                                config.retry_base_delay,
                                cancel,
                                || task.retrieve(&interval, target),
                            );

                            match result {
                                Ok(n) => {
                                    downloaded.fetch_add(1, Ordering::Relaxed);
                                    bytes.fetch_add(n, Ordering::Relaxed);
                                    observer.on_event(&RetrievalEvent::Completed {
                                        interval,
                                        bytes: n,
                                        elapsed: attempt_start.elapsed(),
                                    });
                                }
                                Err(error) => {
                                    observer.on_event(&RetrievalEvent::Failed {
                                        interval,
                                        error: &error,
                                    });
                                    if config.failure_policy == FailurePolicy::FailFast {
                                        cancel.cancel();
                                    }
                                    failures
                                        .lock()
                                        .unwrap_or_else(|e| e.into_inner())
                                        .push(IntervalFailure {
                                            index,
                                            interval,
                                            error,
                                        });
                                }
                            }
                        }
                    });
                }
            });
        });
    }

    let mut failures = failures.into_inner().unwrap_or_else(|e| e.into_inner());
    failures.sort_by_key(|f| f.index);
    let not_attempted = queue.total() - queue.claimed();

    if !failures.is_empty() || not_attempted > 0 {
        return Err(RetrievalFailure {
            total: intervals.len(),
            failures,
            not_attempted,
            cancelled: cancel.is_cancelled(),
        });
    }

    Ok(ScheduleOutcome {
        artifacts,
        skipped,
        downloaded: downloaded.into_inner(),
        bytes: bytes.into_inner(),
        elapsed: start.elapsed(),
    })
}
