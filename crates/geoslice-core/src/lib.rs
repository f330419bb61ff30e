//! Geoslice Core - Partitioned retrieval infrastructure
//!
//! This crate provides the archive-independent parts of the pipeline:
//! date-range partitioning, resume-aware scheduling over a bounded worker
//! pool, retry/backoff, cancellation, HTTP streaming and artifact sinks.

pub mod cancel;
pub mod error;
pub mod logging;
pub mod observer;
pub mod partition;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod stream;
pub mod work_queue;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use error::IntervalError;
pub use logging::{IndicatifLogger, init_logging};
pub use observer::{LogObserver, NoopObserver, RetrievalEvent, RetrievalObserver};
pub use partition::{DateInterval, PartitionError, partition, partition_years};
pub use progress::{ProgressContext, ProgressObserver, SharedProgress, fmt_num};
pub use retry::{Retryable, retry_with_backoff};
pub use scheduler::{
    ArtifactLayout, FailurePolicy, IntervalFailure, IntervalTask, RetrievalFailure,
    ScheduleOutcome, SchedulerConfig, run_schedule,
};
pub use sink::{ArtifactSink, cleanup_tmp_files};
pub use stream::{HttpConfig, SHARED_RUNTIME, StreamError, block_on, build_client};
pub use work_queue::WorkQueue;
