use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::time::Duration;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use coupon_quorum::pipeline::{CodeLoader, LoadError, PipelineBuilder, Source};
use coupon_quorum::{CodeBounds, Downloader, ExternalSorterBuilder};

const DEFAULT_URLS: [&str; 3] = [
    "https://orderfoodonline-files.s3.ap-southeast-2.amazonaws.com/couponbase1.gz",
    "https://orderfoodonline-files.s3.ap-southeast-2.amazonaws.com/couponbase2.gz",
    "https://orderfoodonline-files.s3.ap-southeast-2.amazonaws.com/couponbase3.gz",
];

/// Hands the codes file over for bulk load. The promo-code store itself lives outside this tool,
/// so the file is only validated and counted here.
struct CodesFileLoader;

impl CodeLoader for CodesFileLoader {
    fn load(&self, codes_path: &path::Path) -> Result<(), LoadError> {
        let reader = io::BufReader::new(fs::File::open(codes_path)?);
        let mut codes = 0u64;
        for line in reader.lines() {
            line?;
            codes += 1;
        }

        log::info!("{} quorum-valid codes ready for bulk load at {}", codes, codes_path.display());
        return Ok(());
    }
}

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let output_dir = arg_parser.value_of("output_dir").expect("value has default");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let chunk_limit: usize = arg_parser.value_of_t_or_exit("chunk_limit");
    let merge_fan_in: usize = arg_parser.value_of_t_or_exit("merge_fan_in");
    let min_length: usize = arg_parser.value_of_t_or_exit("min_length");
    let max_length: usize = arg_parser.value_of_t_or_exit("max_length");
    let attempts: usize = arg_parser.value_of_t_or_exit("attempts");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let timeout: Option<u64> = arg_parser
        .is_present("timeout")
        .then(|| arg_parser.value_of_t_or_exit("timeout"));
    let rw_buf_size: Option<usize> = arg_parser.value_of("rw_buf_size").map(|value| {
        value.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize
    });

    let urls: Vec<&str> = arg_parser.values_of("url").expect("value has default").collect();
    let sources: [Source; 3] = match urls.as_slice() {
        [a, b, c] => [source(a), source(b), source(c)],
        _ => {
            log::error!("exactly three source URLs are required, got {}", urls.len());
            process::exit(1);
        }
    };

    let bounds = match CodeBounds::new(min_length, max_length) {
        Some(bounds) => bounds,
        None => {
            log::error!("invalid code length bounds: {}..={}", min_length, max_length);
            process::exit(1);
        }
    };

    let mut agent_config = ureq::Agent::config_builder();
    if let Some(timeout) = timeout {
        agent_config = agent_config.timeout_global(Some(Duration::from_secs(timeout)));
    }
    let mut downloader = Downloader::new(agent_config.build().into(), bounds);

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_chunk_limit(chunk_limit)
        .with_merge_fan_in(merge_fan_in);
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let mut pipeline_builder = PipelineBuilder::new(sources)
        .with_output_dir(path::Path::new(output_dir))
        .with_binary_output(arg_parser.is_present("binary_output"))
        .with_keep_intermediate(arg_parser.is_present("keep_intermediate"));
    if let Some(rw_buf_size) = rw_buf_size {
        sorter_builder = sorter_builder.with_rw_buf_size(rw_buf_size);
        downloader = downloader.with_rw_buf_size(rw_buf_size);
        pipeline_builder = pipeline_builder.with_rw_buf_size(rw_buf_size);
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };
    let pipeline = pipeline_builder.build(downloader, sorter, CodesFileLoader);

    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match pipeline.run() {
            Ok(report) => {
                log::info!(
                    "done: {} quorum-valid codes out of {} distinct -> {}",
                    report.merge.quorum_valid,
                    report.merge.candidates,
                    report.codes_path.display()
                );
                return;
            }
            Err(err) if attempt < attempts => {
                log::warn!("pipeline attempt {}/{} failed: {}", attempt, attempts, err);
            }
            Err(err) => {
                log::error!("preprocessing failed: {}", err);
                process::exit(1);
            }
        }
    }
}

fn source(url: &str) -> Source {
    let name = url
        .rsplit('/')
        .next()
        .and_then(|file| file.split('.').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(url);

    Source::new(name, url)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn is_number(value: &str) -> Result<(), String> {
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|err| format!("number expected: {}", err))
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("coupon-quorum")
        .about("builds the list of coupon codes present in at least two of three datasets")
        .arg(
            clap::Arg::new("url")
                .short('u')
                .long("url")
                .env("COUPON_QUORUM_URLS")
                .help("gzip-compressed source URL, exactly three are required")
                .takes_value(true)
                .multiple_occurrences(true)
                .use_value_delimiter(true)
                .default_values(&DEFAULT_URLS),
        )
        .arg(
            clap::Arg::new("output_dir")
                .short('o')
                .long("output-dir")
                .env("COUPON_QUORUM_OUTPUT_DIR")
                .help("directory for intermediate and result files")
                .takes_value(true)
                .default_value("data"),
        )
        .arg(
            clap::Arg::new("chunk_limit")
                .short('c')
                .long("chunk-limit")
                .env("COUPON_QUORUM_CHUNK_LIMIT")
                .help("maximum number of records sorted in memory at once")
                .takes_value(true)
                .default_value("1000000")
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("min_length")
                .long("min-length")
                .env("COUPON_QUORUM_MIN_LENGTH")
                .help("minimum accepted code length")
                .takes_value(true)
                .default_value("8")
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("max_length")
                .long("max-length")
                .env("COUPON_QUORUM_MAX_LENGTH")
                .help("maximum accepted code length")
                .takes_value(true)
                .default_value("10")
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("merge_fan_in")
                .long("merge-fan-in")
                .env("COUPON_QUORUM_MERGE_FAN_IN")
                .help("maximum number of sorted runs merged at once")
                .takes_value(true)
                .default_value("512")
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .env("COUPON_QUORUM_THREADS")
                .help("number of threads to use for parallel sorting")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .env("COUPON_QUORUM_TMP_DIR")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("rw_buf_size")
                .long("rw-buf-size")
                .env("COUPON_QUORUM_RW_BUF_SIZE")
                .help("file read/write buffer size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("timeout")
                .long("timeout")
                .env("COUPON_QUORUM_TIMEOUT")
                .help("download timeout in seconds")
                .takes_value(true)
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("attempts")
                .long("attempts")
                .env("COUPON_QUORUM_ATTEMPTS")
                .help("number of whole pipeline attempts")
                .takes_value(true)
                .default_value("1")
                .validator(is_number),
        )
        .arg(
            clap::Arg::new("binary_output")
                .long("binary-output")
                .env("COUPON_QUORUM_BINARY_OUTPUT")
                .help("also write the hashes of quorum-valid codes"),
        )
        .arg(
            clap::Arg::new("keep_intermediate")
                .long("keep-intermediate")
                .env("COUPON_QUORUM_KEEP_INTERMEDIATE")
                .help("keep raw and sorted record files"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .env("COUPON_QUORUM_LOGLEVEL")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
