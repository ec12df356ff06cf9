use std::fs;
use std::io::{self, prelude::*};

use tempfile::{TempDir, TempPath};

use crate::codec::{write_record, CodecError};
use crate::reader::{FileReader, SourceReader};
use crate::record::Record;

/// Sorted run stored on the file system.
///
/// A run holds records in ascending `(hash, code)` order without duplicates. The run file lives in the
/// sorter's temporary directory and is removed as soon as the run is dropped, so runs never outlive
/// the merge that consumes them, whether it succeeds or not.
pub struct SortedRun {
    path: TempPath,
    records: u64,
}

impl SortedRun {
    /// Builds a run from records that are already sorted and deduplicated.
    pub fn build(
        dir: &TempDir,
        records: impl IntoIterator<Item = Record>,
        buf_size: Option<usize>,
    ) -> Result<Self, CodecError> {
        let mut writer = RunWriter::create(dir, buf_size)?;
        for record in records.into_iter() {
            writer.push(&record)?;
        }

        return writer.finish();
    }

    /// Number of records in the run.
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Opens a reader over the run records. The run must outlive the reader.
    pub fn open(&self, buf_size: Option<usize>) -> io::Result<FileReader> {
        SourceReader::open(&self.path, buf_size)
    }
}

/// Incremental run writer.
pub struct RunWriter {
    writer: io::BufWriter<fs::File>,
    path: TempPath,
    records: u64,
}

impl RunWriter {
    pub fn create(dir: &TempDir, buf_size: Option<usize>) -> io::Result<Self> {
        let (tmp_file, path) = tempfile::Builder::new()
            .prefix("run-")
            .suffix(".bin")
            .tempfile_in(dir)?
            .into_parts();

        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file),
            None => io::BufWriter::new(tmp_file),
        };

        return Ok(RunWriter {
            writer,
            path,
            records: 0,
        });
    }

    /// Appends the next record. Records must be pushed in ascending order.
    pub fn push(&mut self, record: &Record) -> Result<(), CodecError> {
        write_record(&mut self.writer, record)?;
        self.records += 1;

        return Ok(());
    }

    /// Flushes and closes the run file.
    pub fn finish(mut self) -> Result<SortedRun, CodecError> {
        self.writer.flush()?;

        return Ok(SortedRun {
            path: self.path,
            records: self.records,
        });
    }
}
