//! Atomically committed output files.

use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Buffered writer into a temporary sibling of the target file.
///
/// The data becomes visible at the target path only after [`PendingFile::commit`]. A pending file
/// dropped without commit removes its temporary file, so an aborted stage never leaves partial output
/// behind under the target name.
pub struct PendingFile {
    writer: io::BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl PendingFile {
    /// Creates a pending file for the target path.
    ///
    /// # Arguments
    /// * `target` - Final output path
    /// * `buf_size` - Write buffer size. If the parameter is [`None`] the default buffer size is used.
    pub fn create(target: &Path, buf_size: Option<usize>) -> io::Result<Self> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp_file = tempfile::Builder::new().prefix(".pending-").tempfile_in(dir)?;

        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file),
            None => io::BufWriter::new(tmp_file),
        };

        return Ok(PendingFile {
            writer,
            target: target.to_path_buf(),
        });
    }

    /// Flushes the data and moves the file to the target path, replacing any existing file.
    pub fn commit(self) -> io::Result<()> {
        let tmp_file = self.writer.into_inner().map_err(|err| err.into_error())?;
        tmp_file.as_file().sync_all()?;
        tmp_file.persist(&self.target)?;

        return Ok(());
    }
}

impl Write for PendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
