//! `coupon-quorum` builds the list of coupon codes that appear in at least two of three very large
//! remote datasets.
//!
//! None of the datasets is expected to fit into memory, so the work is done with an external sort-merge
//! pipeline over a compact binary record format:
//!
//! 1. every source is downloaded and decompressed as a stream, each line is trimmed, length-checked,
//!    uppercased and hashed, and the resulting `(hash, code)` records are appended to a local file;
//! 2. each records file is sorted by `(hash, code)` and deduplicated with a bounded-memory external sort
//!    (sorted runs of at most `chunk_limit` records merged through a binary heap);
//! 3. the three sorted files are merged in lockstep and every code held by at least two of them is
//!    written to the result text file, one code per line.
//!
//! For more information on the sorting part see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use coupon_quorum::{merge, sort};
//!
//! for name in ["a", "b", "c"] {
//!     sort(
//!         Path::new(&format!("{}.bin", name)),
//!         Path::new(&format!("{}.sorted.bin", name)),
//!         1_000_000,
//!     )
//!     .unwrap();
//! }
//!
//! let stats = merge(
//!     Path::new("a.sorted.bin"),
//!     Path::new("b.sorted.bin"),
//!     Path::new("c.sorted.bin"),
//!     Path::new("valid_coupons.txt"),
//!     None,
//! )
//! .unwrap();
//! println!("{} quorum-valid codes", stats.quorum_valid);
//! ```

pub mod buffer;
pub mod chunk;
pub mod codec;
pub mod download;
pub mod merger;
pub mod output;
pub mod pipeline;
pub mod quorum;
pub mod reader;
pub mod record;
pub mod sort;

pub use buffer::{LimitedBuffer, LimitedBufferBuilder};
pub use chunk::SortedRun;
pub use codec::{decode, encode, CodecError};
pub use download::{CodeBounds, DownloadError, DownloadStats, Downloader};
pub use merger::{BinaryHeapMerger, MergeGroup};
pub use pipeline::{CodeLoader, Pipeline, PipelineBuilder, PipelineError, PipelineReport, Source};
pub use quorum::{merge, MergeError, MergeStats, QuorumMerger, QUORUM};
pub use reader::SourceReader;
pub use record::Record;
pub use sort::{sort, ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
