//! Artifact sink with atomic tmp→rename publication

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write buffer for artifact files (256KB)
const WRITE_BUF_SIZE: usize = 256 * 1024;

/// `<path>.tmp` next to the final artifact
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Buffered file writer that only exposes the final path once complete.
///
/// Bytes go to `<final>.tmp`; [`finalize`](ArtifactSink::finalize) syncs and
/// renames. Dropping an unfinished sink removes the tmp file, so an aborted
/// download never looks like a completed artifact.
pub struct ArtifactSink {
    writer: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
    /// Set only after the rename succeeded; until then drop removes the tmp file
    published: bool,
}

impl std::fmt::Debug for ArtifactSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSink")
            .field("final_path", &self.final_path)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl ArtifactSink {
    /// Create a new sink writing to a temporary file
    pub fn create(final_path: &Path) -> io::Result<Self> {
        let tmp_path = tmp_path_for(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        Ok(Self {
            writer: Some(BufWriter::with_capacity(WRITE_BUF_SIZE, file)),
            tmp_path,
            final_path: final_path.to_path_buf(),
            bytes_written: 0,
            published: false,
        })
    }

    /// Append a chunk of bytes
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::other("sink already finalized"))?;
        writer.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Finalize: flush, fsync and atomically rename tmp → final
    pub fn finalize(mut self) -> io::Result<u64> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("sink already finalized"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        self.published = true;
        Ok(self.bytes_written)
    }
}

impl Drop for ArtifactSink {
    fn drop(&mut self) {
        drop(self.writer.take());
        if !self.published {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::debug!("Failed to remove {}: {e}", self.tmp_path.display());
                }
            }
        }
    }
}

/// Remove stale `*.<extension>.tmp` files left in `dir` by an earlier run.
///
/// Other `.tmp` files are not ours and stay untouched.
pub fn cleanup_tmp_files(dir: &Path, extension: &str) -> io::Result<usize> {
    let suffix = format!(".{extension}.tmp");
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let owned = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.len() > suffix.len() && name.ends_with(&suffix));
        if owned && path.is_file() {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
