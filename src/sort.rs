//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io::{self, prelude::*};
use std::mem;
use std::path::Path;

use crate::chunk::{RunWriter, SortedRun};
use crate::codec::{write_record, CodecError};
use crate::merger::BinaryHeapMerger;
use crate::output::PendingFile;
use crate::reader::SourceReader;
use crate::record::Record;
use crate::{LimitedBuffer, LimitedBufferBuilder};

/// Default number of runs merged at once.
pub const DEFAULT_MERGE_FAN_IN: usize = 512;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Input records file is corrupted or unreadable.
    InputError(CodecError),
    /// Run file read/write error.
    RunError(CodecError),
    /// Output records file write error.
    OutputError(CodecError),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::TempDir(err) => err,
            SortError::ThreadPoolBuildError(err) => err,
            SortError::IO(err) => err,
            SortError::InputError(err) => err,
            SortError::RunError(err) => err,
            SortError::OutputError(err) => err,
        })
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::InputError(err) => write!(f, "input records error: {}", err),
            SortError::RunError(err) => write!(f, "sorted run error: {}", err),
            SortError::OutputError(err) => write!(f, "output records error: {}", err),
        }
    }
}

/// Sorting summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Records read from the input.
    pub input_records: u64,
    /// Runs produced by the first pass.
    pub runs: usize,
    /// Intermediate merge levels performed before the final merge.
    pub merge_levels: usize,
    /// Distinct records written to the output.
    pub output_records: u64,
}

impl SortStats {
    /// Number of dropped duplicate records.
    pub fn duplicates(&self) -> u64 {
        self.input_records - self.output_records
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder {
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of runs merged at once.
    merge_fan_in: usize,
    /// Chunk buffer builder.
    buffer_builder: LimitedBufferBuilder,
}

impl ExternalSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter, SortError> {
        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.buffer_builder,
            self.rw_buf_size,
            self.merge_fan_in,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets buffer builder.
    pub fn with_buffer(mut self, buffer_builder: LimitedBufferBuilder) -> ExternalSorterBuilder {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets the maximum number of records held in memory, i.e. the run size.
    pub fn with_chunk_limit(self, chunk_limit: usize) -> ExternalSorterBuilder {
        self.with_buffer(LimitedBufferBuilder::new(chunk_limit, false))
    }

    /// Sets run and output file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets the maximum number of runs merged at once. Values below 2 are raised to 2.
    pub fn with_merge_fan_in(mut self, merge_fan_in: usize) -> ExternalSorterBuilder {
        self.merge_fan_in = merge_fan_in;
        return self;
    }
}

impl Default for ExternalSorterBuilder {
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            merge_fan_in: DEFAULT_MERGE_FAN_IN,
            buffer_builder: LimitedBufferBuilder::default(),
        }
    }
}

/// External sorter of record files.
///
/// Sorting is done in two passes. The first pass reads the input in chunks of at most `chunk_limit`
/// records, sorts and deduplicates each chunk in memory and stores it as a run in a temporary directory.
/// The second pass merges all runs into the output, dropping records repeated across runs. The result
/// is strictly ascending by `(hash, code)`.
pub struct ExternalSorter {
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    /// Chunk buffer builder.
    buffer_builder: LimitedBufferBuilder,
    /// Run and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of runs merged at once.
    merge_fan_in: usize,
}

impl ExternalSorter {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `buffer_builder` - An instance of a buffer builder that will be used for chunk buffer creation.
    /// * `rw_buf_size` - Run and output files read/write buffer size.
    /// * `merge_fan_in` - Maximum number of runs merged at once.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        buffer_builder: LimitedBufferBuilder,
        rw_buf_size: Option<usize>,
        merge_fan_in: usize,
    ) -> Result<Self, SortError> {
        return Ok(ExternalSorter {
            rw_buf_size,
            buffer_builder,
            merge_fan_in: merge_fan_in.max(2),
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts and deduplicates a records file.
    ///
    /// The output file appears at `output_path` only if sorting succeeds. All runs are removed before
    /// returning, on success as well as on failure.
    ///
    /// # Arguments
    /// * `input_path` - Unsorted records file
    /// * `output_path` - Sorted records file to be created or replaced
    pub fn sort(&self, input_path: &Path, output_path: &Path) -> Result<SortStats, SortError> {
        log::info!("sorting {} -> {}", input_path.display(), output_path.display());

        let input = SourceReader::open(input_path, self.rw_buf_size).map_err(SortError::IO)?;
        let mut output = PendingFile::create(output_path, self.rw_buf_size).map_err(SortError::IO)?;

        let stats = self.sort_records(input, &mut output)?;
        output.commit().map_err(SortError::IO)?;

        log::info!(
            "sorted {}: {} records, {} runs, {} distinct, {} duplicates dropped",
            input_path.display(),
            stats.input_records,
            stats.runs,
            stats.output_records,
            stats.duplicates(),
        );

        return Ok(stats);
    }

    /// Sorts and deduplicates a stream of records writing the result to the writer.
    /// The writer is flushed but not committed anywhere.
    pub fn sort_records<I, W>(&self, input: I, output: &mut W) -> Result<SortStats, SortError>
    where
        I: IntoIterator<Item = Result<Record, CodecError>>,
        W: Write,
    {
        let mut stats = SortStats::default();

        let runs = self.produce_runs(input, &mut stats)?;
        stats.runs = runs.len();
        log::debug!("external sort preparation done ({} runs)", runs.len());

        let runs = self.reduce_runs(runs, &mut stats)?;

        let mut writer = |record: &Record| write_record(&mut *output, record).map_err(SortError::OutputError);
        stats.output_records = self.merge_runs(&runs, &mut writer)?;
        drop(runs);

        output.flush().map_err(SortError::IO)?;

        return Ok(stats);
    }

    fn produce_runs<I>(&self, input: I, stats: &mut SortStats) -> Result<Vec<SortedRun>, SortError>
    where
        I: IntoIterator<Item = Result<Record, CodecError>>,
    {
        let mut chunk_buf = self.buffer_builder.build();
        let mut runs = Vec::new();

        for item in input.into_iter() {
            match item {
                Ok(item) => chunk_buf.push(item),
                Err(err) => return Err(SortError::InputError(err)),
            }
            stats.input_records += 1;

            if chunk_buf.is_full() {
                runs.push(self.create_run(chunk_buf)?);
                chunk_buf = self.buffer_builder.build();
            }
        }

        if !chunk_buf.is_empty() {
            runs.push(self.create_run(chunk_buf)?);
        }

        return Ok(runs);
    }

    fn create_run(&self, mut buffer: LimitedBuffer<Record>) -> Result<SortedRun, SortError> {
        log::debug!("sorting chunk data ({} records) ...", buffer.len());
        let duplicates = self.thread_pool.install(|| buffer.sort_dedup());

        log::debug!("saving chunk data ({} duplicates dropped)", duplicates);
        let run = SortedRun::build(&self.tmp_dir, buffer, self.rw_buf_size).map_err(SortError::RunError)?;

        return Ok(run);
    }

    /// Merges runs in groups of `merge_fan_in` until at most `merge_fan_in` runs remain.
    fn reduce_runs(&self, mut runs: Vec<SortedRun>, stats: &mut SortStats) -> Result<Vec<SortedRun>, SortError> {
        while runs.len() > self.merge_fan_in {
            stats.merge_levels += 1;
            log::debug!("merge level {}: reducing {} runs", stats.merge_levels, runs.len());

            let mut merged = Vec::with_capacity(runs.len() / self.merge_fan_in + 1);
            let mut group = Vec::with_capacity(self.merge_fan_in);
            for run in runs {
                group.push(run);
                if group.len() == self.merge_fan_in {
                    merged.push(self.merge_into_run(mem::take(&mut group))?);
                }
            }
            match group.len() {
                0 => {}
                1 => merged.extend(group),
                _ => merged.push(self.merge_into_run(group)?),
            }

            runs = merged;
        }

        return Ok(runs);
    }

    fn merge_into_run(&self, runs: Vec<SortedRun>) -> Result<SortedRun, SortError> {
        let mut run_writer = RunWriter::create(&self.tmp_dir, self.rw_buf_size).map_err(SortError::TempDir)?;

        let mut writer = |record: &Record| run_writer.push(record).map_err(SortError::RunError);
        self.merge_runs(&runs, &mut writer)?;
        drop(runs);

        return run_writer.finish().map_err(SortError::RunError);
    }

    /// Merges runs passing every distinct record to the writer in ascending order.
    /// Returns the number of written records.
    fn merge_runs<F>(&self, runs: &[SortedRun], writer: &mut F) -> Result<u64, SortError>
    where
        F: FnMut(&Record) -> Result<(), SortError>,
    {
        let readers = runs
            .iter()
            .map(|run| run.open(self.rw_buf_size))
            .collect::<io::Result<Vec<_>>>()
            .map_err(SortError::IO)?;

        let mut last: Option<Record> = None;
        let mut written = 0;
        for group in BinaryHeapMerger::new(readers) {
            let record = group.map_err(SortError::RunError)?.record;
            if last.as_ref() == Some(&record) {
                continue;
            }

            writer(&record)?;
            written += 1;
            last = Some(record);
        }

        return Ok(written);
    }
}

/// Sorts and deduplicates a records file holding at most `chunk_limit` records in memory.
/// Uses the default OS temporary directory for runs.
pub fn sort(input_path: &Path, output_path: &Path, chunk_limit: usize) -> Result<SortStats, SortError> {
    ExternalSorterBuilder::new()
        .with_chunk_limit(chunk_limit)
        .build()?
        .sort(input_path, output_path)
}
