use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use fqpipe::config::{FilterOptions, RunConfig};
use fqpipe::error::FqError;
use fqpipe::phred::{infer_scheme, DEFAULT_SAMPLE_RECORDS};
use fqpipe::pipeline::{CancelToken, Job, Pipeline};
use fqpipe::processor::{ProcessorChain, TrimMode};
use fqpipe::{stats, stream};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "FASTQ quality statistics and filtering over a parallel record pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute per-position quality and base-composition statistics
    Stat(StatArgs),
    /// Filter and trim records, writing survivors to a new file
    Filter(FilterArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Input FASTQ file, optionally gzip/bzip2/xz compressed
    #[arg(short, long)]
    input: PathBuf,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 1)]
    threads: usize,
}

#[derive(Args, Debug)]
struct StatArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum TrimModeArg {
    Both,
    Five,
    Three,
}

impl From<TrimModeArg> for TrimMode {
    fn from(mode: TrimModeArg) -> Self {
        match mode {
            TrimModeArg::Both => TrimMode::Both,
            TrimModeArg::Five => TrimMode::FivePrime,
            TrimModeArg::Three => TrimMode::ThreePrime,
        }
    }
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Quality encoding offset (33 or 64); inferred from the input when absent
    #[arg(long)]
    quality_encoding: Option<u8>,

    /// Keep records whose mean Phred quality reaches this threshold
    #[arg(long)]
    min_quality: Option<f64>,

    /// Keep records at least this long
    #[arg(long)]
    min_length: Option<usize>,

    /// Keep records at most this long
    #[arg(long)]
    max_length: Option<usize>,

    /// Keep records whose fraction of N bases does not exceed this bound
    #[arg(long)]
    max_n_ratio: Option<f64>,

    /// Trim read ends while the base quality is below this threshold
    #[arg(long)]
    trim_quality: Option<f64>,

    /// Which end(s) the quality trimmer works from
    #[arg(long, value_enum, default_value_t = TrimModeArg::Both)]
    trim_mode: TrimModeArg,

    /// Drop reads the trimmer leaves shorter than this
    #[arg(long, default_value_t = 0)]
    trim_min_length: usize,

    /// Keep the tag after '+' in the output
    #[arg(long)]
    preserve_plus: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<FqError>() {
            Some(FqError::Canceled) => {
                eprintln!("canceled");
                ExitCode::from(130)
            }
            Some(e) => {
                eprintln!("error: {}: {}", e.kind_name(), e);
                ExitCode::from(1)
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::from(1)
            }
        },
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Stat(args) => run_stat(args),
        Command::Filter(args) => run_filter(args),
    }
}

fn install_cancel_handler(token: CancelToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || token.cancel()).context("failed to install interrupt handler")
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {pos} records {per_sec}")
            .expect("valid progress template"),
    );
    pb
}

fn build_config(common: &CommonArgs, pb: &ProgressBar) -> RunConfig {
    let mut config = RunConfig::new(&common.input, &common.output);
    config.threads = common.threads;
    let pb = pb.clone();
    config.progress = Some(Box::new(move |n| pb.set_position(n)));
    config
}

fn input_basename(path: &std::path::Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn run_stat(args: StatArgs) -> anyhow::Result<()> {
    let scheme = infer_scheme(&args.common.input, DEFAULT_SAMPLE_RECORDS)?;
    if !scheme.is_fixed_length {
        return Err(FqError::UnsupportedFormat(
            "stat requires uniform-length records".into(),
        )
        .into());
    }

    let pb = progress_bar();
    let pipeline = Pipeline::new(build_config(&args.common, &pb));
    install_cancel_handler(pipeline.cancel_token())?;

    let out = pipeline.run(Job::Stat {
        offset: scheme.offset,
        read_length: scheme.read_length,
    })?;
    pb.finish_and_clear();

    // The report exists only after a completed run; cancellation leaves
    // no output file behind.
    let stat = out.stat.expect("stat job always yields a tally");
    let mut sink = stream::open_sink(&args.common.output)?;
    stats::write_report(
        &mut sink,
        &stat,
        scheme.offset,
        &input_basename(&args.common.input),
    )
    .and_then(|_| sink.flush())
    .map_err(|e| FqError::io(&args.common.output, e))?;

    log::info!(
        "stat: {} records, {} batches, {:.3}s",
        out.stats.records_in,
        out.stats.batches,
        out.stats.elapsed.as_secs_f64()
    );
    Ok(())
}

fn run_filter(args: FilterArgs) -> anyhow::Result<()> {
    let opts = FilterOptions {
        quality_encoding: args.quality_encoding,
        min_quality: args.min_quality,
        min_length: args.min_length,
        max_length: args.max_length,
        max_n_ratio: args.max_n_ratio,
        trim_quality: args.trim_quality,
        trim_mode: args.trim_mode.into(),
        trim_min_length: args.trim_min_length,
    };
    opts.validate()?;

    let offset = match opts.quality_encoding {
        Some(enc) => enc,
        None if opts.needs_quality_offset() => {
            infer_scheme(&args.common.input, DEFAULT_SAMPLE_RECORDS)?.offset
        }
        None => 33,
    };
    let chain = ProcessorChain::from_options(&opts, offset);

    let pb = progress_bar();
    let mut config = build_config(&args.common, &pb);
    config.preserve_plus = args.preserve_plus;
    let pipeline = Pipeline::new(config);
    install_cancel_handler(pipeline.cancel_token())?;

    let out = pipeline.run(Job::Filter(chain))?;
    pb.finish_and_clear();

    let total = out.stats.records_in;
    let kept = out.stats.records_out;
    let pct = if total > 0 {
        kept as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    println!(
        "{}\t{}\t{}\t{:.2}",
        input_basename(&args.common.input),
        total,
        kept,
        pct
    );
    Ok(())
}
