//! Merged output writer

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use geoslice_core::sink::tmp_path_for;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Parquet writer with atomic tmp→rename.
///
/// The previous output (if any) stays in place until
/// [`finalize`](ParquetOutput::finalize) succeeds; an unfinished writer
/// removes its tmp file on drop.
pub struct ParquetOutput {
    writer: Option<ArrowWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetOutput")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetOutput {
    pub fn create(final_path: &Path, schema: SchemaRef, zstd_level: i32) -> io::Result<Self> {
        let tmp_path = tmp_path_for(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(1024 * 1024)
            .build();

        let file = File::create(&tmp_path)?;
        let writer = match ArrowWriter::try_new(file, schema, Some(props)) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(io::Error::other(e));
            }
        };

        Ok(Self {
            writer: Some(writer),
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("output already finalized"))?;
        writer.write(batch).map_err(io::Error::other)?;
        self.row_count += batch.num_rows();
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Flush footer and atomically rename tmp → final
    pub fn finalize(mut self) -> io::Result<usize> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("output already finalized"))?;
        let closed = writer
            .close()
            .map_err(io::Error::other)
            .and_then(|_| fs::rename(&self.tmp_path, &self.final_path));
        if let Err(e) = closed {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(e);
        }
        Ok(self.row_count)
    }
}

impl Drop for ParquetOutput {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                log::debug!("Failed to remove {}: {e}", self.tmp_path.display());
            }
        }
    }
}
