//! geoslice-merge: concatenate partial artifacts along a time dimension
//!
//! Inputs arrive in interval order; the merged artifact holds every column of
//! every input, with the time dimension strictly increasing across inputs.

mod concat;
mod dimension;
mod error;
#[cfg(feature = "netcdf")]
mod nc;
mod sink;

pub use concat::{DEFAULT_ZSTD_LEVEL, ParquetConcat};
pub use error::MergeError;
#[cfg(feature = "netcdf")]
pub use nc::NetcdfConcat;
pub use sink::ParquetOutput;

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Summary statistics from a merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeStats {
    pub inputs: usize,
    pub rows: usize,
    pub elapsed: Duration,
}

/// Engine that concatenates labeled datasets along a named dimension
pub trait ConcatEngine: Send + Sync {
    /// File extension of the artifacts this engine reads and writes
    fn extension(&self) -> &str;

    /// `data_format` to request from the archive so artifacts are readable
    fn data_format(&self) -> &str;

    /// Concatenate `inputs` in the given order into `output`.
    ///
    /// `output` is replaced only when the whole merge succeeds.
    fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<MergeStats, MergeError>;
}
