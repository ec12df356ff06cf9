//! Limited chunk buffer.

use rayon::slice::ParallelSliceMut;

/// Chunk buffer builder. Holds the configured per-chunk record limit.
#[derive(Clone)]
pub struct LimitedBufferBuilder {
    buffer_limit: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    /// Creates a builder of buffers holding at most `buffer_limit` records.
    /// A limit of zero behaves as a limit of one.
    pub fn new(buffer_limit: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            buffer_limit: buffer_limit.max(1),
            preallocate,
        }
    }

    pub fn limit(&self) -> usize {
        self.buffer_limit
    }

    /// Creates a new buffer.
    pub fn build<T>(&self) -> LimitedBuffer<T> {
        if self.preallocate {
            LimitedBuffer::with_capacity(self.buffer_limit)
        } else {
            LimitedBuffer::new(self.buffer_limit)
        }
    }
}

impl Default for LimitedBufferBuilder {
    fn default() -> Self {
        LimitedBufferBuilder {
            buffer_limit: usize::MAX,
            preallocate: false,
        }
    }
}

/// Buffer limited by elements count.
pub struct LimitedBuffer<T> {
    limit: usize,
    inner: Vec<T>,
}

impl<T> LimitedBuffer<T> {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    pub fn with_capacity(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        self.inner.push(item);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }
}

impl<T: Ord + Send> LimitedBuffer<T> {
    /// Sorts the buffer in parallel on the current rayon pool and removes equal neighbours.
    /// Returns the number of removed duplicates.
    pub fn sort_dedup(&mut self) -> usize {
        let len = self.inner.len();
        self.inner.par_sort_unstable();
        self.inner.dedup();

        return len - self.inner.len();
    }
}

impl<T> IntoIterator for LimitedBuffer<T> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::LimitedBufferBuilder;
    use crate::record::Record;

    #[test]
    fn test_limited_buffer() {
        let builder = LimitedBufferBuilder::new(2, true);
        let mut buffer = builder.build();

        buffer.push(0);
        assert_eq!(buffer.is_full(), false);
        buffer.push(1);
        assert_eq!(buffer.is_full(), true);

        let data = Vec::from_iter(buffer);
        assert_eq!(data, vec![0, 1]);
    }

    #[test]
    fn test_zero_limit() {
        let builder = LimitedBufferBuilder::new(0, false);
        let mut buffer = builder.build();

        assert_eq!(builder.limit(), 1);
        buffer.push(7);
        assert_eq!(buffer.is_full(), true);
    }

    #[test]
    fn test_sort_dedup() {
        let mut buffer = LimitedBufferBuilder::new(8, false).build();
        for record in [
            Record::new(3, "CCCCCCCC"),
            Record::new(1, "BBBBBBBB"),
            Record::new(1, "AAAAAAAA"),
            Record::new(3, "CCCCCCCC"),
            Record::new(1, "AAAAAAAA"),
        ] {
            buffer.push(record);
        }

        assert_eq!(buffer.sort_dedup(), 2);
        assert_eq!(
            Vec::from_iter(buffer),
            vec![
                Record::new(1, "AAAAAAAA"),
                Record::new(1, "BBBBBBBB"),
                Record::new(3, "CCCCCCCC"),
            ]
        );
    }
}
