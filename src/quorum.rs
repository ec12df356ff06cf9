//! Three-way quorum merger.
//!
//! Streams three sorted, deduplicated record files in lockstep and keeps only the codes present in at
//! least [`QUORUM`] of them.

use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::codec::{write_hash, CodecError};
use crate::merger::BinaryHeapMerger;
use crate::output::PendingFile;
use crate::reader::SourceReader;

/// Minimum number of inputs a code must appear in to be emitted.
pub const QUORUM: usize = 2;

/// Merging error.
#[derive(Debug)]
pub enum MergeError {
    /// Input file could not be opened. Reported before any output is created.
    Open { path: PathBuf, error: io::Error },
    /// Input records file is corrupted or unreadable.
    InputError(CodecError),
    /// Output file creation or write error.
    OutputError(io::Error),
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            MergeError::Open { error, .. } => error,
            MergeError::InputError(err) => err,
            MergeError::OutputError(err) => err,
        })
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MergeError::Open { path, error } => write!(f, "cannot open {}: {}", path.display(), error),
            MergeError::InputError(err) => write!(f, "input records error: {}", err),
            MergeError::OutputError(err) => write!(f, "output write failed: {}", err),
        }
    }
}

impl From<CodecError> for MergeError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(err) => MergeError::OutputError(err),
            err => MergeError::InputError(err),
        }
    }
}

/// Merging summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Distinct codes seen across all inputs.
    pub candidates: u64,
    /// Codes written to the output.
    pub quorum_valid: u64,
}

/// Three-way quorum merger.
#[derive(Debug, Clone, Default)]
pub struct QuorumMerger {
    /// Input and output files read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl QuorumMerger {
    pub fn new() -> Self {
        QuorumMerger::default()
    }

    /// Sets input and output files read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Merges three sorted record files.
    ///
    /// Writes every quorum-valid code to `output_text` (one code per line) and, if requested, its hash
    /// to `output_binary` as 8 little-endian bytes, both in ascending `(hash, code)` order. Outputs
    /// appear only if the whole merge succeeds.
    ///
    /// # Arguments
    /// * `inputs` - Sorted and deduplicated record files
    /// * `output_text` - Text file of quorum-valid codes
    /// * `output_binary` - Optional file of quorum-valid code hashes
    pub fn merge(
        &self,
        inputs: [&Path; 3],
        output_text: &Path,
        output_binary: Option<&Path>,
    ) -> Result<MergeStats, MergeError> {
        let mut readers = Vec::with_capacity(inputs.len());
        for path in inputs {
            let reader = SourceReader::open(path, self.rw_buf_size).map_err(|error| MergeError::Open {
                path: path.to_path_buf(),
                error,
            })?;
            readers.push(reader);
        }

        let mut text = PendingFile::create(output_text, self.rw_buf_size).map_err(MergeError::OutputError)?;
        let mut binary = match output_binary {
            Some(path) => Some(PendingFile::create(path, self.rw_buf_size).map_err(MergeError::OutputError)?),
            None => None,
        };

        let mut stats = MergeStats::default();
        for group in BinaryHeapMerger::new(readers) {
            let group = group.map_err(MergeError::InputError)?;
            stats.candidates += 1;
            if group.matches < QUORUM {
                continue;
            }

            text.write_all(group.record.code.as_bytes())
                .and_then(|_| text.write_all(b"\n"))
                .map_err(MergeError::OutputError)?;
            if let Some(binary) = binary.as_mut() {
                write_hash(binary, group.record.hash)?;
            }
            stats.quorum_valid += 1;
        }

        text.commit().map_err(MergeError::OutputError)?;
        if let Some(binary) = binary {
            binary.commit().map_err(MergeError::OutputError)?;
        }

        log::info!(
            "merged {} distinct codes, {} quorum-valid -> {}",
            stats.candidates,
            stats.quorum_valid,
            output_text.display()
        );

        return Ok(stats);
    }
}

/// Merges three sorted record files into the text file of quorum-valid codes and, optionally, the
/// parallel binary file of their hashes.
pub fn merge(
    sorted_a: &Path,
    sorted_b: &Path,
    sorted_c: &Path,
    output_text: &Path,
    output_binary: Option<&Path>,
) -> Result<MergeStats, MergeError> {
    QuorumMerger::new().merge([sorted_a, sorted_b, sorted_c], output_text, output_binary)
}
