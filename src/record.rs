//! Hashed coupon record.

use std::fmt;

use xxhash_rust::xxh64::xxh64;

/// Seed used for code hashing. Zero keeps record files compatible with the XXH64 sums produced by the
/// dataset tooling.
pub const HASH_SEED: u64 = 0;

/// Computes the 64-bit hash of a canonical code.
pub fn hash_code(code: &str) -> u64 {
    xxh64(code.as_bytes(), HASH_SEED)
}

/// A canonical code paired with its hash.
///
/// Records are totally ordered by `(hash, code)`: hashes are compared numerically, ties are broken by
/// byte-wise code comparison. Two records are the same code only if both fields are equal, so a hash
/// collision between different codes is never treated as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    // field order defines the derived ordering
    pub hash: u64,
    pub code: String,
}

impl Record {
    /// Creates a record from already known parts.
    pub fn new(hash: u64, code: impl Into<String>) -> Self {
        Record {
            hash,
            code: code.into(),
        }
    }

    /// Creates a record hashing the provided canonical code.
    pub fn from_code(code: impl Into<String>) -> Self {
        let code = code.into();
        Record {
            hash: hash_code(&code),
            code,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:016x})", self.code, self.hash)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{hash_code, Record};

    #[test]
    fn test_hash_is_xxh64() {
        assert_eq!(hash_code(""), 0xEF46DB3751D8E999);
        assert_eq!(Record::from_code("CODE0001").hash, hash_code("CODE0001"));
    }

    #[rstest]
    #[case(Record::new(1, "ZZZ"), Record::new(2, "AAA"))]
    #[case(Record::new(7, "AAA"), Record::new(7, "AAB"))]
    #[case(Record::new(7, "AB"), Record::new(7, "ABC"))]
    #[case(Record::new(u64::MAX - 1, ""), Record::new(u64::MAX, ""))]
    fn test_record_ordering(#[case] lesser: Record, #[case] greater: Record) {
        assert!(lesser < greater);
        assert!(greater > lesser);
        assert_ne!(lesser, greater);
    }

    #[test]
    fn test_hash_collision_is_not_identity() {
        let a = Record::new(42, "CODEAAAA");
        let b = Record::new(42, "CODEBBBB");

        assert_ne!(a, b);
        assert_eq!(a, Record::new(42, "CODEAAAA"));
    }
}
