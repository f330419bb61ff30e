//! Pipeline driver: partition → schedule → merge

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use geoslice_core::partition::{DateInterval, PartitionError};
use geoslice_core::{
    ArtifactLayout, CancelToken, IntervalError, LogObserver, RetrievalFailure, RetrievalObserver,
    cleanup_tmp_files, run_schedule,
};
use geoslice_merge::{ConcatEngine, MergeError, MergeStats};

use crate::auth::CredentialSource;
use crate::client::ArchiveClient;
use crate::config::{PipelineConfig, Query};
use crate::download::PollingDownloader;
use crate::order::OrderResolver;

/// Terminal error of a pipeline run
#[derive(Debug)]
pub enum RunError {
    /// No access token available
    Auth,
    /// One or more intervals could not be retrieved
    Retrieval(RetrievalFailure),
    Merge(MergeError),
    Partition(PartitionError),
    Io(std::io::Error),
    /// Stopped by the cancel token
    Cancelled,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "no access token available"),
            Self::Retrieval(e) => write!(f, "retrieval failed: {e}"),
            Self::Merge(e) => write!(f, "merge failed: {e}"),
            Self::Partition(e) => write!(f, "invalid period: {e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Retrieval(e) => Some(e),
            Self::Merge(e) => Some(e),
            Self::Partition(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Auth | Self::Cancelled => None,
        }
    }
}

impl From<MergeError> for RunError {
    fn from(e: MergeError) -> Self {
        Self::Merge(e)
    }
}

impl From<PartitionError> for RunError {
    fn from(e: PartitionError) -> Self {
        Self::Partition(e)
    }
}

impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Outcome of a successful run
#[derive(Debug)]
pub struct RunSummary {
    pub intervals: usize,
    pub skipped: usize,
    pub downloaded: usize,
    pub bytes: u64,
    pub retrieval_time: Duration,
    pub merge: MergeStats,
    pub merged_path: PathBuf,
    pub total_time: Duration,
}

/// Resume state of one interval
#[derive(Debug, Clone)]
pub struct IntervalStatus {
    pub interval: DateInterval,
    pub path: PathBuf,
    pub done: bool,
}

/// One configured retrieval pipeline
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    credentials: &'a dyn CredentialSource,
    engine: &'a dyn ConcatEngine,
    observer: &'a dyn RetrievalObserver,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        credentials: &'a dyn CredentialSource,
        engine: &'a dyn ConcatEngine,
    ) -> Self {
        Self {
            config,
            credentials,
            engine,
            observer: &LogObserver,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn RetrievalObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(self.config.partial_dir(), self.engine.extension())
    }

    pub fn merged_path(&self) -> PathBuf {
        self.config.merged_path(self.engine.extension())
    }

    /// Done/pending state of every interval, without network access
    pub fn plan(&self) -> Result<Vec<IntervalStatus>, RunError> {
        let layout = self.layout();
        Ok(self
            .config
            .period
            .intervals()?
            .into_iter()
            .map(|interval| {
                let path = layout.path_for(&interval);
                let done = path.exists();
                IntervalStatus {
                    interval,
                    path,
                    done,
                }
            })
            .collect())
    }

    /// Retrieve every missing interval, then merge all of them
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        let token = self.credentials.token().ok_or(RunError::Auth)?;
        let intervals = self.config.period.intervals()?;

        let layout = self.layout();
        let extension = self.engine.extension();
        prepare_dir(layout.dir(), extension)?;
        prepare_dir(&self.config.output_dir, extension)?;

        let client = ArchiveClient::new(&self.config.base_url, token, &self.config.http)
            .map_err(|e| RunError::Io(std::io::Error::other(e)))?
            .with_cancel(self.cancel.clone());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| RunError::Io(std::io::Error::other(e)))?;

        log::info!(
            "Retrieving {} intervals ({} to {}) with {} workers",
            intervals.len(),
            intervals.first().map(|iv| iv.start.to_string()).unwrap_or_default(),
            intervals.last().map(|iv| iv.end.to_string()).unwrap_or_default(),
            pool.current_num_threads()
        );

        let query = self.query();
        let resolver = OrderResolver::new(&client, &query);
        let downloader =
            PollingDownloader::new(&client, &self.config.poll, &self.cancel, self.observer);
        let cancel = &self.cancel;
        let task = |interval: &DateInterval, target: &Path| -> Result<u64, IntervalError> {
            let result = resolver
                .resolve(interval)
                .and_then(|order| downloader.download(interval, order, target));
            match result {
                // Transport errors caused by an interrupt are not real failures
                Err(_) if cancel.is_cancelled() => Err(IntervalError::Cancelled),
                result => result,
            }
        };

        let outcome = run_schedule(
            &intervals,
            &layout,
            &self.config.scheduler(),
            &pool,
            &self.cancel,
            self.observer,
            &task,
        )
        .map_err(|failure| self.classify(failure))?;
        log::info!(
            "Retrieval phase: {} downloaded, {} skipped in {:.1}s",
            outcome.downloaded,
            outcome.skipped,
            outcome.elapsed.as_secs_f64()
        );

        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let merged_path = self.merged_path();
        let merge = self.engine.concat(&outcome.artifacts, &merged_path)?;
        log::info!(
            "Merge phase: {} rows in {:.1}s -> {}",
            merge.rows,
            merge.elapsed.as_secs_f64(),
            merged_path.display()
        );

        Ok(RunSummary {
            intervals: intervals.len(),
            skipped: outcome.skipped,
            downloaded: outcome.downloaded,
            bytes: outcome.bytes,
            retrieval_time: outcome.elapsed,
            merge,
            merged_path,
            total_time: start.elapsed(),
        })
    }

    /// Merge an already complete partial directory
    pub fn merge_only(&self) -> Result<MergeStats, RunError> {
        let intervals = self.config.period.intervals()?;
        let artifacts = self.layout().paths(&intervals);
        Ok(self.engine.concat(&artifacts, &self.merged_path())?)
    }

    /// Search filters, asking for the format the merge engine reads
    fn query(&self) -> Query {
        let mut query = self.config.query.clone();
        let format = self.engine.data_format();
        if query.data_format != format {
            log::warn!(
                "data_format {} cannot be merged by this engine; requesting {format}",
                query.data_format
            );
            query.data_format = format.to_string();
        }
        query
    }

    /// Interrupts surface as `Cancelled`; real failures win over cancellation
    fn classify(&self, failure: RetrievalFailure) -> RunError {
        let only_cancelled = failure
            .failures
            .iter()
            .all(|f| matches!(f.error, IntervalError::Cancelled));
        if failure.cancelled && only_cancelled {
            RunError::Cancelled
        } else {
            RunError::Retrieval(failure)
        }
    }
}

/// Create `dir` and drop tmp files a previous run of this engine left behind
fn prepare_dir(dir: &Path, extension: &str) -> Result<(), RunError> {
    std::fs::create_dir_all(dir)?;
    let removed = cleanup_tmp_files(dir, extension)?;
    if removed > 0 {
        log::info!("Removed {removed} stale tmp files from {}", dir.display());
    }
    Ok(())
}
