//! Remote source downloader and code normalizer.

use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use log;

use crate::codec::{write_record, CodecError, MAX_CODE_LEN};
use crate::output::PendingFile;
use crate::record::Record;

/// Default minimum accepted code length.
pub const MIN_CODE_LENGTH: usize = 8;
/// Default maximum accepted code length.
pub const MAX_CODE_LENGTH: usize = 10;
/// Longest source line kept in memory. Longer lines are drained and skipped.
pub const MAX_LINE_LENGTH: usize = 1 << 20;

/// Download/normalization error.
#[derive(Debug)]
pub enum DownloadError {
    /// Request failed or the server responded with an error status.
    Transport(ureq::Error),
    /// Server responded with a status other than 200.
    Status(u16),
    /// Response body could not be read or decompressed.
    Stream(io::Error),
    /// Records file creation or write error.
    Output(CodecError),
}

impl Error for DownloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            DownloadError::Transport(err) => Some(err),
            DownloadError::Status(_) => None,
            DownloadError::Stream(err) => Some(err),
            DownloadError::Output(err) => Some(err),
        }
    }
}

impl Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            DownloadError::Transport(err) => write!(f, "download failed: {}", err),
            DownloadError::Status(status) => write!(f, "unexpected HTTP status {}", status),
            DownloadError::Stream(err) => write!(f, "source stream error: {}", err),
            DownloadError::Output(err) => write!(f, "records file error: {}", err),
        }
    }
}

impl From<ureq::Error> for DownloadError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(status) => DownloadError::Status(status),
            err => DownloadError::Transport(err),
        }
    }
}

/// Inclusive code length bounds, in bytes of the trimmed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBounds {
    min: usize,
    max: usize,
}

impl CodeBounds {
    /// Creates bounds accepting codes of `min..=max` bytes.
    /// Returns `None` if the range is empty or exceeds the record code limit.
    pub fn new(min: usize, max: usize) -> Option<Self> {
        if min > max || max > MAX_CODE_LEN {
            return None;
        }

        return Some(CodeBounds { min, max });
    }

    /// Converts a raw source line into its canonical form.
    /// Returns `None` for lines that are not valid UTF-8 or whose trimmed length is out of bounds.
    pub fn normalize(&self, line: &[u8]) -> Option<String> {
        let code = std::str::from_utf8(line).ok()?.trim();
        if code.len() < self.min || code.len() > self.max {
            return None;
        }

        return Some(code.to_uppercase());
    }
}

impl Default for CodeBounds {
    fn default() -> Self {
        CodeBounds {
            min: MIN_CODE_LENGTH,
            max: MAX_CODE_LENGTH,
        }
    }
}

/// Normalization summary of one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Lines written as records.
    pub accepted: u64,
    /// Lines dropped as invalid.
    pub skipped: u64,
}

/// Downloads gzip-compressed code lists and converts them into unsorted record files.
///
/// Lines are streamed through the decompressor and never buffered as a whole. Duplicates are kept,
/// they are removed later by the sorter.
#[derive(Clone)]
pub struct Downloader {
    agent: ureq::Agent,
    bounds: CodeBounds,
    rw_buf_size: Option<usize>,
}

impl Downloader {
    /// Creates a downloader using the provided HTTP agent.
    pub fn new(agent: ureq::Agent, bounds: CodeBounds) -> Self {
        Downloader {
            agent,
            bounds,
            rw_buf_size: None,
        }
    }

    /// Sets records file write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Downloads one source into a records file.
    ///
    /// # Arguments
    /// * `source_url` - URL of a gzip-compressed, newline-delimited code list
    /// * `output_path` - Records file to be created or replaced
    pub fn process(&self, source_url: &str, output_path: &Path) -> Result<DownloadStats, DownloadError> {
        log::info!("downloading {} ...", source_url);
        let response = self.agent.get(source_url).call()?;
        if response.status().as_u16() != 200 {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let stats = self.process_gzip(response.into_body().into_reader(), output_path)?;
        log::info!(
            "processed {}: {} codes, skipped {} invalid -> {}",
            source_url,
            stats.accepted,
            stats.skipped,
            output_path.display()
        );

        return Ok(stats);
    }

    /// Converts a gzip-compressed code list into a records file.
    pub fn process_gzip<R: Read>(&self, compressed: R, output_path: &Path) -> Result<DownloadStats, DownloadError> {
        self.process_lines(io::BufReader::new(MultiGzDecoder::new(compressed)), output_path)
    }

    /// Converts a plain code list into a records file.
    pub fn process_lines<R: BufRead>(&self, mut lines: R, output_path: &Path) -> Result<DownloadStats, DownloadError> {
        let mut output = PendingFile::create(output_path, self.rw_buf_size)
            .map_err(|err| DownloadError::Output(CodecError::Io(err)))?;

        let mut stats = DownloadStats::default();
        let mut line = Vec::new();
        loop {
            line.clear();
            let line_len =
                read_line_limited(&mut lines, &mut line, MAX_LINE_LENGTH).map_err(DownloadError::Stream)?;
            if line_len == 0 {
                break;
            }
            if line_len > line.len() {
                stats.skipped += 1;
                continue;
            }

            match self.bounds.normalize(&line) {
                Some(code) => {
                    write_record(&mut output, &Record::from_code(code)).map_err(DownloadError::Output)?;
                    stats.accepted += 1;
                }
                None => stats.skipped += 1,
            }
        }

        output
            .commit()
            .map_err(|err| DownloadError::Output(CodecError::Io(err)))?;

        return Ok(stats);
    }
}

/// Reads one line including its terminator, keeping at most `limit` bytes of it in `line`.
/// The rest of a longer line is consumed and dropped. Returns the full line length, 0 at end of stream.
fn read_line_limited<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let (done, used) = {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(total);
            }

            let (done, used) = match available.iter().position(|byte| *byte == b'\n') {
                Some(pos) => (true, pos + 1),
                None => (false, available.len()),
            };
            let keep = used.min(limit.saturating_sub(line.len()));
            line.extend_from_slice(&available[..keep]);
            (done, used)
        };

        reader.consume(used);
        total += used;
        if done {
            return Ok(total);
        }
    }
}
