//! Single-lookahead record cursor.

use std::fs;
use std::io;
use std::path::Path;

use crate::codec::{read_record, CodecError};
use crate::record::Record;

/// Record file reader type used across the pipeline.
pub type FileReader = SourceReader<io::BufReader<fs::File>>;

/// Pull cursor over one encoded record stream.
///
/// The cursor caches one decoded record: [`SourceReader::has_more`] decodes it on demand and keeps it until
/// [`SourceReader::advance`] is called, so repeated `has_more` calls never consume input. A decoding error
/// ends the stream and is kept available through [`SourceReader::error`].
pub struct SourceReader<R> {
    inner: R,
    current: Option<Record>,
    done: bool,
    error: Option<CodecError>,
}

impl SourceReader<io::BufReader<fs::File>> {
    /// Opens a record file.
    ///
    /// # Arguments
    /// * `path` - Record file path
    /// * `buf_size` - Read buffer size. If the parameter is [`None`] the default buffer size is used.
    pub fn open(path: &Path, buf_size: Option<usize>) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(SourceReader::new(reader));
    }
}

impl<R: io::Read> SourceReader<R> {
    pub fn new(inner: R) -> Self {
        SourceReader {
            inner,
            current: None,
            done: false,
            error: None,
        }
    }

    /// Checks whether a current record is available, decoding it if needed.
    pub fn has_more(&mut self) -> bool {
        if self.current.is_some() {
            return true;
        }
        if self.done {
            return false;
        }

        match read_record(&mut self.inner) {
            Ok(Some(record)) => {
                self.current = Some(record);
                true
            }
            Ok(None) => {
                self.done = true;
                false
            }
            Err(err) => {
                self.error = Some(err);
                self.done = true;
                false
            }
        }
    }

    /// Returns the current record. Call [`SourceReader::has_more`] first.
    pub fn peek(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    /// Drops the current record so that the next `has_more` call decodes the following one.
    pub fn advance(&mut self) {
        self.current = None;
    }

    /// Takes the current record out of the cursor, advancing it.
    pub fn pop(&mut self) -> Option<Record> {
        if self.has_more() {
            self.current.take()
        } else {
            None
        }
    }

    /// Returns the error that ended the stream, if any.
    pub fn error(&self) -> Option<&CodecError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<CodecError> {
        self.error.take()
    }
}

impl<R: io::Read> Iterator for SourceReader<R> {
    type Item = Result<Record, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.pop() {
            Some(record) => Some(Ok(record)),
            None => self.take_error().map(Err),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::SourceReader;
    use crate::codec::{encode, CodecError};
    use crate::record::Record;

    fn stream(records: &[Record]) -> Vec<u8> {
        records.iter().flat_map(|r| encode(r).unwrap()).collect()
    }

    #[test]
    fn test_has_more_is_idempotent() {
        let records = vec![Record::new(1, "AAAAAAA1"), Record::new(2, "BBBBBBB2")];
        let mut reader = SourceReader::new(io::Cursor::new(stream(&records)));

        assert!(reader.has_more());
        assert!(reader.has_more());
        assert_eq!(reader.peek(), Some(&records[0]));

        reader.advance();
        assert!(reader.has_more());
        assert_eq!(reader.peek(), Some(&records[1]));

        reader.advance();
        assert!(!reader.has_more());
        assert!(!reader.has_more());
        assert_eq!(reader.peek(), None);
        assert!(reader.error().is_none());
    }

    #[test]
    fn test_empty_stream() {
        let mut reader = SourceReader::new(io::empty());

        assert!(!reader.has_more());
        assert!(reader.error().is_none());
        assert_eq!(reader.next().map(|r| r.is_ok()), None);
    }

    #[test]
    fn test_corruption_is_reported() {
        let mut bytes = stream(&[Record::new(1, "AAAAAAA1")]);
        bytes.extend_from_slice(&[9, 9, 9]);
        let mut reader = SourceReader::new(bytes.as_slice());

        assert_eq!(reader.pop(), Some(Record::new(1, "AAAAAAA1")));
        assert!(!reader.has_more());
        assert!(matches!(reader.error(), Some(CodecError::TruncatedHash(3))));
    }

    #[test]
    fn test_iterator() {
        let records = vec![Record::new(1, "A"), Record::new(1, "B"), Record::new(0, "C")];
        let mut bytes = stream(&records);
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 4]);

        let restored: Vec<Result<Record, CodecError>> = SourceReader::new(bytes.as_slice()).collect();

        assert_eq!(restored.len(), 4);
        assert!(restored[..3].iter().zip(&records).all(|(a, b)| a.as_ref().unwrap() == b));
        assert!(matches!(restored[3], Err(CodecError::TruncatedLength)));
    }
}
