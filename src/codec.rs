//! Binary record codec.
//!
//! Every record file of the pipeline (raw records, sort runs, sorted records) is a plain concatenation of
//! records in the following layout:
//!
//! | bytes     | content                               |
//! |-----------|---------------------------------------|
//! | 8         | code hash, little-endian `u64`        |
//! | 2         | code length `L`, little-endian `u16`  |
//! | `L`       | code bytes                            |
//!
//! There is no header and no checksum. A stream ends cleanly only at a record boundary; anything else
//! is reported as corruption.

use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};

use crate::record::Record;

/// Encoded hash size.
pub const HASH_SIZE: usize = 8;
/// Encoded code length prefix size.
pub const LEN_SIZE: usize = 2;
/// Maximum code length representable by the length prefix.
pub const MAX_CODE_LEN: usize = u16::MAX as usize;

/// Record encoding/decoding error.
#[derive(Debug)]
pub enum CodecError {
    /// Underlying stream I/O error.
    Io(io::Error),
    /// Stream ended in the middle of a record hash.
    TruncatedHash(usize),
    /// Stream ended in the middle of a code length prefix.
    TruncatedLength,
    /// Stream ended before the announced code bytes.
    TruncatedPayload(usize),
    /// Code bytes are not valid UTF-8.
    InvalidUtf8(std::string::FromUtf8Error),
    /// Code does not fit the 16-bit length prefix.
    CodeTooLong(usize),
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            CodecError::Io(err) => Some(err),
            CodecError::InvalidUtf8(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            CodecError::Io(err) => write!(f, "record stream I/O failed: {}", err),
            CodecError::TruncatedHash(read) => {
                write!(f, "truncated record: {} of {} hash bytes", read, HASH_SIZE)
            }
            CodecError::TruncatedLength => write!(f, "truncated record: incomplete code length"),
            CodecError::TruncatedPayload(len) => write!(f, "truncated record: incomplete {}-byte code", len),
            CodecError::InvalidUtf8(err) => write!(f, "record code is not valid UTF-8: {}", err),
            CodecError::CodeTooLong(len) => {
                write!(f, "code of {} bytes exceeds the {} bytes limit", len, MAX_CODE_LEN)
            }
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        CodecError::Io(err)
    }
}

/// Encodes a record into a new byte vector.
pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(HASH_SIZE + LEN_SIZE + record.code.len());
    write_record(&mut buf, record)?;

    return Ok(buf);
}

/// Decodes the first record of a byte slice.
/// Returns `None` if the slice is empty.
pub fn decode(mut bytes: &[u8]) -> Result<Option<Record>, CodecError> {
    read_record(&mut bytes)
}

/// Writes a record to the writer.
/// Fails before writing anything if the code does not fit the length prefix.
pub fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<(), CodecError> {
    let len = record.code.len();
    if len > MAX_CODE_LEN {
        return Err(CodecError::CodeTooLong(len));
    }

    writer.write_all(&record.hash.to_le_bytes())?;
    writer.write_all(&(len as u16).to_le_bytes())?;
    writer.write_all(record.code.as_bytes())?;

    return Ok(());
}

/// Writes a bare hash in the record hash layout.
pub fn write_hash<W: Write>(writer: &mut W, hash: u64) -> Result<(), CodecError> {
    writer.write_all(&hash.to_le_bytes())?;
    return Ok(());
}

/// Reads the next record from the reader.
/// Returns `None` on a clean end of stream.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<Record>, CodecError> {
    let mut hash_buf = [0u8; HASH_SIZE];
    match read_full(reader, &mut hash_buf)? {
        0 => return Ok(None),
        HASH_SIZE => {}
        read => return Err(CodecError::TruncatedHash(read)),
    }

    let mut len_buf = [0u8; LEN_SIZE];
    if read_full(reader, &mut len_buf)? != LEN_SIZE {
        return Err(CodecError::TruncatedLength);
    }
    let len = u16::from_le_bytes(len_buf) as usize;

    let mut code = vec![0u8; len];
    if read_full(reader, &mut code)? != len {
        return Err(CodecError::TruncatedPayload(len));
    }
    let code = String::from_utf8(code).map_err(CodecError::InvalidUtf8)?;

    return Ok(Some(Record::new(u64::from_le_bytes(hash_buf), code)));
}

/// Fills the buffer as far as the stream allows. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    return Ok(filled);
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{decode, encode, read_record, write_hash, CodecError, MAX_CODE_LEN};
    use crate::record::Record;

    #[test]
    fn test_layout() {
        let encoded = encode(&Record::new(0x0102030405060708, "AB")).unwrap();

        assert_eq!(encoded, vec![8, 7, 6, 5, 4, 3, 2, 1, 2, 0, b'A', b'B']);
    }

    #[rstest]
    #[case(1)]
    #[case(8)]
    #[case(10)]
    #[case(256)]
    #[case(MAX_CODE_LEN)]
    fn test_round_trip(#[case] len: usize) {
        let record = Record::from_code("X".repeat(len));

        let encoded = encode(&record).unwrap();
        assert_eq!(encoded.len(), 10 + len);
        assert_eq!(decode(&encoded).unwrap(), Some(record));
    }

    #[test]
    fn test_code_too_long() {
        let mut buf = Vec::new();
        let result = super::write_record(&mut buf, &Record::new(1, "X".repeat(MAX_CODE_LEN + 1)));

        assert!(matches!(result, Err(CodecError::CodeTooLong(len)) if len == MAX_CODE_LEN + 1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_of_records() {
        let records = vec![Record::from_code("CODE0001"), Record::new(3, ""), Record::from_code("CODE0002")];
        let stream: Vec<u8> = records.iter().flat_map(|r| encode(r).unwrap()).collect();

        let mut reader = stream.as_slice();
        let mut restored = Vec::new();
        while let Some(record) = read_record(&mut reader).unwrap() {
            restored.push(record);
        }

        assert_eq!(restored, records);
    }

    #[test]
    fn test_clean_eof() {
        assert_eq!(decode(&[]).unwrap(), None);
    }

    #[rstest]
    #[case(3)]
    #[case(8)]
    #[case(9)]
    #[case(11)]
    fn test_truncated_record(#[case] cut: usize) {
        let encoded = encode(&Record::new(5, "ABCDEFGH")).unwrap();

        let result = decode(&encoded[..cut]);
        match cut {
            3 => assert!(matches!(result, Err(CodecError::TruncatedHash(3)))),
            8 | 9 => assert!(matches!(result, Err(CodecError::TruncatedLength))),
            _ => assert!(matches!(result, Err(CodecError::TruncatedPayload(8)))),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = [1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0xff, 0xfe];

        assert!(matches!(decode(&bytes), Err(CodecError::InvalidUtf8(_))));
    }

    #[test]
    fn test_write_hash() {
        let mut buf = Vec::new();
        write_hash(&mut buf, 0xAABB).unwrap();

        assert_eq!(buf, vec![0xBB, 0xAA, 0, 0, 0, 0, 0, 0]);
    }
}
