//! Preprocessing pipeline orchestrator.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use rayon::prelude::*;

use crate::download::{DownloadError, DownloadStats, Downloader};
use crate::quorum::{MergeError, MergeStats, QuorumMerger};
use crate::sort::{ExternalSorter, SortError, SortStats};

/// Quorum-valid codes text file name.
pub const CODES_FILE: &str = "valid_coupons.txt";
/// Quorum-valid code hashes file name.
pub const HASHES_FILE: &str = "valid_coupons.bin";

/// Boxed error returned by a [`CodeLoader`].
pub type LoadError = Box<dyn Error + Send + Sync>;

/// A named remote dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub url: String,
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Source {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Unsorted records file of the source at position `idx`.
/// Intermediate files are named by position so sources sharing a name never share a file.
fn raw_path(dir: &Path, idx: usize) -> PathBuf {
    dir.join(format!("pairs{}.bin", idx + 1))
}

/// Sorted records file of the source at position `idx`.
fn sorted_path(dir: &Path, idx: usize) -> PathBuf {
    dir.join(format!("pairs{}.sorted.bin", idx + 1))
}

/// Consumer of the final codes file, e.g. a bulk upsert into the promo-code store.
pub trait CodeLoader {
    /// Loads the quorum-valid codes, one normalized code per line.
    fn load(&self, codes_path: &Path) -> Result<(), LoadError>;
}

/// Pipeline error.
#[derive(Debug)]
pub enum PipelineError {
    /// Output directory creation error.
    OutputDir(io::Error),
    /// Download thread pool initialization error.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// Source download error.
    Download { source: String, error: DownloadError },
    /// Source records sorting error.
    Sort { source: String, error: SortError },
    /// Quorum merge error.
    Merge(MergeError),
    /// Codes loader error.
    Load(LoadError),
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            PipelineError::OutputDir(err) => err,
            PipelineError::ThreadPool(err) => err,
            PipelineError::Download { error, .. } => error,
            PipelineError::Sort { error, .. } => error,
            PipelineError::Merge(err) => err,
            PipelineError::Load(err) => &**err,
        })
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            PipelineError::OutputDir(err) => write!(f, "output directory not created: {}", err),
            PipelineError::ThreadPool(err) => write!(f, "download thread pool initialization failed: {}", err),
            PipelineError::Download { source, error } => write!(f, "source {} download failed: {}", source, error),
            PipelineError::Sort { source, error } => write!(f, "source {} sorting failed: {}", source, error),
            PipelineError::Merge(err) => write!(f, "quorum merge failed: {}", err),
            PipelineError::Load(err) => write!(f, "codes loading failed: {}", err),
        }
    }
}

/// Pipeline run summary.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Per-source normalization counts, in source order.
    pub downloads: Vec<DownloadStats>,
    /// Per-source sorting counts, in source order.
    pub sorts: Vec<SortStats>,
    pub merge: MergeStats,
    /// Quorum-valid codes text file.
    pub codes_path: PathBuf,
    /// Quorum-valid code hashes file, if requested.
    pub hashes_path: Option<PathBuf>,
}

/// Pipeline builder. Provides methods for [`Pipeline`] initialization.
pub struct PipelineBuilder {
    sources: [Source; 3],
    output_dir: PathBuf,
    binary_output: bool,
    keep_intermediate: bool,
    rw_buf_size: Option<usize>,
}

impl PipelineBuilder {
    /// Creates a builder for the three sources.
    pub fn new(sources: [Source; 3]) -> Self {
        PipelineBuilder {
            sources,
            output_dir: PathBuf::from("data"),
            binary_output: false,
            keep_intermediate: false,
            rw_buf_size: None,
        }
    }

    /// Sets directory for the intermediate and final files.
    pub fn with_output_dir(mut self, path: &Path) -> Self {
        self.output_dir = path.to_path_buf();
        return self;
    }

    /// Enables the quorum-valid code hashes file.
    pub fn with_binary_output(mut self, enabled: bool) -> Self {
        self.binary_output = enabled;
        return self;
    }

    /// Keeps raw and sorted record files after they are consumed.
    pub fn with_keep_intermediate(mut self, enabled: bool) -> Self {
        self.keep_intermediate = enabled;
        return self;
    }

    /// Sets merge read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Builds a [`Pipeline`] from the stage components and the codes loader.
    pub fn build<L: CodeLoader>(self, downloader: Downloader, sorter: ExternalSorter, loader: L) -> Pipeline<L> {
        let mut merger = QuorumMerger::new();
        if let Some(buf_size) = self.rw_buf_size {
            merger = merger.with_rw_buf_size(buf_size);
        }

        Pipeline {
            sources: self.sources,
            output_dir: self.output_dir,
            binary_output: self.binary_output,
            keep_intermediate: self.keep_intermediate,
            downloader,
            sorter,
            merger,
            loader,
        }
    }
}

/// Preprocessing pipeline for three sources.
///
/// Downloads all sources concurrently, then sorts each records file, merges the sorted files and hands
/// the quorum-valid codes file to the loader. Any stage failure aborts the run.
pub struct Pipeline<L> {
    sources: [Source; 3],
    output_dir: PathBuf,
    binary_output: bool,
    keep_intermediate: bool,
    downloader: Downloader,
    sorter: ExternalSorter,
    merger: QuorumMerger,
    loader: L,
}

impl<L: CodeLoader> Pipeline<L> {
    /// Runs all stages.
    pub fn run(&self) -> Result<PipelineReport, PipelineError> {
        log::info!("starting promo code preprocessing pipeline");
        fs::create_dir_all(&self.output_dir).map_err(PipelineError::OutputDir)?;

        let downloads = self.download()?;

        let mut sorts = Vec::with_capacity(self.sources.len());
        for (idx, source) in self.sources.iter().enumerate() {
            let raw_path = raw_path(&self.output_dir, idx);
            let stats = self
                .sorter
                .sort(&raw_path, &sorted_path(&self.output_dir, idx))
                .map_err(|error| PipelineError::Sort {
                    source: source.name.clone(),
                    error,
                })?;
            self.discard(&raw_path);
            sorts.push(stats);
        }

        log::info!("merging sorted sources ...");
        let sorted_paths: Vec<PathBuf> = (0..self.sources.len())
            .map(|idx| sorted_path(&self.output_dir, idx))
            .collect();
        let codes_path = self.output_dir.join(CODES_FILE);
        let hashes_path = self.binary_output.then(|| self.output_dir.join(HASHES_FILE));
        let merge = self
            .merger
            .merge(
                [&sorted_paths[0], &sorted_paths[1], &sorted_paths[2]],
                &codes_path,
                hashes_path.as_deref(),
            )
            .map_err(PipelineError::Merge)?;
        for path in sorted_paths.iter() {
            self.discard(path);
        }

        log::info!("loading {} quorum-valid codes ...", merge.quorum_valid);
        self.loader.load(&codes_path).map_err(PipelineError::Load)?;
        log::info!("preprocessing completed");

        return Ok(PipelineReport {
            downloads,
            sorts,
            merge,
            codes_path,
            hashes_path,
        });
    }

    /// Downloads all sources in parallel, one worker per source.
    /// Waits for every worker and fails if any of them failed.
    fn download(&self) -> Result<Vec<DownloadStats>, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.sources.len())
            .thread_name(|idx| format!("download-{}", idx))
            .build()
            .map_err(PipelineError::ThreadPool)?;

        let (sources, downloader, output_dir) = (&self.sources, &self.downloader, &self.output_dir);
        let results: Vec<Result<DownloadStats, PipelineError>> = pool.install(|| {
            sources
                .par_iter()
                .enumerate()
                .map(|(idx, source)| {
                    downloader
                        .process(&source.url, &raw_path(output_dir, idx))
                        .map_err(|error| {
                            log::error!("source {} ({}) failed: {}", source.name, source.url, error);
                            PipelineError::Download {
                                source: source.name.clone(),
                                error,
                            }
                        })
                })
                .collect()
        });

        return results.into_iter().collect();
    }

    fn discard(&self, path: &Path) {
        if self.keep_intermediate {
            return;
        }
        if let Err(err) = fs::remove_file(path) {
            log::warn!("cannot remove {}: {}", path.display(), err);
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};

    use rstest::*;

    use super::{CodeLoader, LoadError, Pipeline, PipelineBuilder, PipelineError, Source, CODES_FILE, HASHES_FILE};
    use crate::download::test::{gzip, serve};
    use crate::download::{CodeBounds, DownloadError, Downloader};
    use crate::record::Record;
    use crate::sort::ExternalSorterBuilder;

    #[derive(Default)]
    struct RecordingLoader {
        loaded: RefCell<Vec<PathBuf>>,
        fail: bool,
    }

    impl CodeLoader for RecordingLoader {
        fn load(&self, codes_path: &Path) -> Result<(), LoadError> {
            self.loaded.borrow_mut().push(codes_path.to_path_buf());
            if self.fail {
                return Err("store unavailable".into());
            }
            Ok(())
        }
    }

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn pipeline(
        base: &str,
        dir: &Path,
        binary_output: bool,
        keep_intermediate: bool,
        loader: RecordingLoader,
    ) -> Pipeline<RecordingLoader> {
        let sources = [
            Source::new("couponbase1", format!("{}/couponbase1.gz", base)),
            Source::new("couponbase2", format!("{}/couponbase2.gz", base)),
            Source::new("couponbase3", format!("{}/couponbase3.gz", base)),
        ];
        let sorter = ExternalSorterBuilder::new()
            .with_chunk_limit(2)
            .with_threads_number(1)
            .with_tmp_dir(dir)
            .build()
            .unwrap();

        PipelineBuilder::new(sources)
            .with_output_dir(&dir.join("data"))
            .with_binary_output(binary_output)
            .with_keep_intermediate(keep_intermediate)
            .build(
                Downloader::new(ureq::Agent::new_with_defaults(), CodeBounds::default()),
                sorter,
                loader,
            )
    }

    fn routes(bodies: [&str; 3]) -> HashMap<String, (u16, Vec<u8>)> {
        HashMap::from_iter(
            bodies
                .iter()
                .enumerate()
                .map(|(idx, body)| (format!("/couponbase{}.gz", idx + 1), (200, gzip(body)))),
        )
    }

    fn expected_codes(codes: &[&str]) -> Vec<String> {
        let mut records = Vec::from_iter(codes.iter().map(|code| Record::from_code(*code)));
        records.sort();
        records.into_iter().map(|r| r.code).collect()
    }

    #[rstest]
    fn test_pipeline(tmp_dir: tempfile::TempDir) {
        let base = serve(routes([
            "code0001\ncode0002\nCODE0002\nabcd\nshared99\n",
            "  CODE0001\nshared99\nonly0002\n",
            "code0002\ncode0003\nSHARED99\nonly0002\n",
        ]));
        let pipeline = pipeline(&base, tmp_dir.path(), true, false, RecordingLoader::default());

        let report = pipeline.run().unwrap();

        let data = tmp_dir.path().join("data");
        assert_eq!(report.codes_path, data.join(CODES_FILE));
        let codes: Vec<String> = fs::read_to_string(&report.codes_path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(codes, expected_codes(&["CODE0001", "CODE0002", "SHARED99", "ONLY0002"]));
        assert_eq!(fs::metadata(data.join(HASHES_FILE)).unwrap().len(), 4 * 8);

        assert_eq!(report.downloads[0].accepted, 4);
        assert_eq!(report.downloads[0].skipped, 1);
        assert_eq!(report.sorts[0].output_records, 3);
        assert_eq!(report.merge.candidates, 5);
        assert_eq!(report.merge.quorum_valid, 4);
        assert_eq!(*pipeline.loader.loaded.borrow(), vec![report.codes_path.clone()]);

        let mut leftovers: Vec<String> = fs::read_dir(&data)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        leftovers.sort();
        assert_eq!(leftovers, vec![HASHES_FILE.to_string(), CODES_FILE.to_string()]);
    }

    #[rstest]
    fn test_keep_intermediate(tmp_dir: tempfile::TempDir) {
        let base = serve(routes(["code0001\n", "code0001\n", ""]));
        let pipeline = pipeline(&base, tmp_dir.path(), false, true, RecordingLoader::default());

        let report = pipeline.run().unwrap();

        let data = tmp_dir.path().join("data");
        assert!(report.hashes_path.is_none());
        for idx in 1..=3 {
            assert!(data.join(format!("pairs{}.bin", idx)).exists());
            assert!(data.join(format!("pairs{}.sorted.bin", idx)).exists());
        }
        assert_eq!(fs::read_to_string(&report.codes_path).unwrap(), "CODE0001\n");
    }

    #[rstest]
    fn test_failed_download_aborts(tmp_dir: tempfile::TempDir) {
        let mut routes = routes(["code0001\n", "code0001\n", "code0001\n"]);
        routes.insert("/couponbase2.gz".to_string(), (503, Vec::new()));
        let base = serve(routes);
        let pipeline = pipeline(&base, tmp_dir.path(), false, false, RecordingLoader::default());

        let result = pipeline.run();

        assert!(matches!(
            result,
            Err(PipelineError::Download { ref source, error: DownloadError::Status(503) }) if source == "couponbase2"
        ));
        let data = tmp_dir.path().join("data");
        assert!(!data.join("pairs1.sorted.bin").exists());
        assert!(!data.join(CODES_FILE).exists());
        assert!(pipeline.loader.loaded.borrow().is_empty());
    }

    #[rstest]
    fn test_failed_load(tmp_dir: tempfile::TempDir) {
        let base = serve(routes(["code0001\n", "code0001\n", ""]));
        let loader = RecordingLoader {
            fail: true,
            ..RecordingLoader::default()
        };
        let pipeline = pipeline(&base, tmp_dir.path(), false, false, loader);

        let result = pipeline.run();

        assert!(matches!(result, Err(PipelineError::Load(_))));
        assert_eq!(pipeline.loader.loaded.borrow().len(), 1);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_sources_sharing_name(tmp_dir: tempfile::TempDir, #[case] keep_intermediate: bool) {
        let base = serve(HashMap::from([
            ("/x/coupons.gz".to_string(), (200, gzip("onlyinaa\nshared01\n"))),
            ("/y/coupons.gz".to_string(), (200, gzip("onlyinbb\nshared01\n"))),
            ("/other.gz".to_string(), (200, gzip("zzzzzzzz\n"))),
        ]));
        let sources = [
            Source::new("coupons", format!("{}/x/coupons.gz", base)),
            Source::new("coupons", format!("{}/y/coupons.gz", base)),
            Source::new("other", format!("{}/other.gz", base)),
        ];
        let sorter = ExternalSorterBuilder::new()
            .with_threads_number(1)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();
        let pipeline = PipelineBuilder::new(sources)
            .with_output_dir(&tmp_dir.path().join("data"))
            .with_keep_intermediate(keep_intermediate)
            .build(
                Downloader::new(ureq::Agent::new_with_defaults(), CodeBounds::default()),
                sorter,
                RecordingLoader::default(),
            );

        let report = pipeline.run().unwrap();

        assert_eq!(fs::read_to_string(&report.codes_path).unwrap(), "SHARED01\n");
        assert_eq!(report.merge.candidates, 4);
        assert_eq!(report.sorts.iter().map(|stats| stats.output_records).collect::<Vec<_>>(), vec![2, 2, 1]);
    }
}
