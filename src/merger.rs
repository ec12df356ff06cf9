//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::Read;

use crate::codec::CodecError;
use crate::reader::SourceReader;
use crate::record::Record;

/// A distinct record produced by the merger together with the number of inputs that held it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeGroup {
    pub record: Record,
    pub matches: usize,
}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted stream of distinct records.
///
/// On every step the smallest head record is taken together with every other head equal to it, and all
/// of those inputs are advanced. Provided each input is strictly ascending, `matches` is the number of
/// distinct inputs containing the record. Time complexity is *m* \* log(*n*) in worst case where *m* is
/// the number of records, *n* is the number of inputs.
pub struct BinaryHeapMerger<R> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<Reverse<(Record, usize)>>,
    readers: Vec<SourceReader<R>>,
    initiated: bool,
    failed: bool,
}

impl<R: Read> BinaryHeapMerger<R> {
    /// Creates an instance of a binary heap merger using readers as inputs.
    /// Input records should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `readers` - Readers to be merged in a single sorted stream
    pub fn new<I>(readers: I) -> Self
    where
        I: IntoIterator<Item = SourceReader<R>>,
    {
        let readers = Vec::from_iter(readers);
        let items = BinaryHeap::with_capacity(readers.len());

        return BinaryHeapMerger {
            readers,
            items,
            initiated: false,
            failed: false,
        };
    }

    fn refill(&mut self, idx: usize) -> Result<(), CodecError> {
        let reader = &mut self.readers[idx];
        match reader.pop() {
            Some(record) => self.items.push(Reverse((record, idx))),
            None => {
                if let Some(err) = reader.take_error() {
                    return Err(err);
                }
            }
        }

        return Ok(());
    }

    fn next_group(&mut self) -> Result<Option<MergeGroup>, CodecError> {
        if !self.initiated {
            for idx in 0..self.readers.len() {
                self.refill(idx)?;
            }
            self.initiated = true;
        }

        let Reverse((record, idx)) = match self.items.pop() {
            Some(item) => item,
            None => return Ok(None),
        };

        // the heap holds at most one head per input, so every input is counted once per group
        let mut matched = vec![idx];
        while let Some(Reverse((top, _))) = self.items.peek() {
            if *top != record {
                break;
            }
            if let Some(Reverse((_, idx))) = self.items.pop() {
                matched.push(idx);
            }
        }
        for &idx in matched.iter() {
            self.refill(idx)?;
        }

        return Ok(Some(MergeGroup {
            record,
            matches: matched.len(),
        }));
    }
}

impl<R: Read> Iterator for BinaryHeapMerger<R> {
    type Item = Result<MergeGroup, CodecError>;

    /// Returns the next distinct record from the inputs in ascending order.
    /// Any input error is returned once and terminates the stream.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.next_group() {
            Ok(group) => group.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{BinaryHeapMerger, MergeGroup};
    use crate::codec::{encode, CodecError};
    use crate::reader::SourceReader;
    use crate::record::Record;

    fn reader(records: &[(u64, &str)]) -> SourceReader<std::io::Cursor<Vec<u8>>> {
        let bytes = records
            .iter()
            .flat_map(|(hash, code)| encode(&Record::new(*hash, *code)).unwrap())
            .collect();
        SourceReader::new(std::io::Cursor::new(bytes))
    }

    fn group(hash: u64, code: &str, matches: usize) -> MergeGroup {
        MergeGroup {
            record: Record::new(hash, code),
            matches,
        }
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![(4, "D"), (5, "E"), (7, "G")],
            vec![(1, "A"), (6, "F")],
            vec![(3, "C")],
            vec![],
        ],
        vec![group(1, "A", 1), group(3, "C", 1), group(4, "D", 1), group(5, "E", 1), group(6, "F", 1), group(7, "G", 1)],
    )]
    #[case(
        vec![
            vec![(1, "A"), (2, "B"), (9, "X")],
            vec![(1, "A"), (9, "X")],
            vec![(2, "B"), (9, "X")],
        ],
        vec![group(1, "A", 2), group(2, "B", 2), group(9, "X", 3)],
    )]
    #[case(
        vec![
            vec![(5, "AAA"), (5, "BBB")],
            vec![(5, "BBB")],
            vec![(5, "AAB")],
        ],
        vec![group(5, "AAA", 1), group(5, "AAB", 1), group(5, "BBB", 2)],
    )]
    #[case(
        vec![
            vec![(1, "A"), (1, "A"), (2, "B")],
            vec![(1, "A")],
            vec![(2, "B")],
        ],
        vec![group(1, "A", 2), group(1, "A", 1), group(2, "B", 2)],
    )]
    fn test_merger(#[case] inputs: Vec<Vec<(u64, &str)>>, #[case] expected_result: Vec<MergeGroup>) {
        let merger = BinaryHeapMerger::new(inputs.iter().map(|records| reader(records)));

        let actual_result: Result<Vec<MergeGroup>, CodecError> = merger.collect();
        assert_eq!(actual_result.unwrap(), expected_result);
    }

    #[test]
    fn test_merger_error() {
        let mut corrupted = encode(&Record::new(3, "C")).unwrap();
        corrupted.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 5, 0, b'x']);

        let inputs = vec![
            SourceReader::new(std::io::Cursor::new(corrupted)),
            reader(&[(1, "A"), (2, "B")]),
        ];
        let actual_result: Vec<Result<MergeGroup, CodecError>> = BinaryHeapMerger::new(inputs).collect();

        assert_eq!(actual_result.len(), 3);
        assert_eq!(actual_result[0].as_ref().unwrap(), &group(1, "A", 1));
        assert_eq!(actual_result[1].as_ref().unwrap(), &group(2, "B", 1));
        assert!(matches!(actual_result[2], Err(CodecError::TruncatedPayload(5))));
    }
}
