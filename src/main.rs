//! Mouthmap - Main Application Entrypoint
//!
//! This file is responsible for parsing command-line arguments, initializing
//! the application environment (like logging), and dispatching the core
//! processing logic.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use mouthmap::alignment::{TimeBase, DEFAULT_SAMPLE_RATE};
use mouthmap::{Config, DecodeFailurePolicy, DEFAULT_FILLER};
use std::path::{Path, PathBuf};

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

/// Builds a per-frame mouth geometry dataset from a lip-reading video corpus.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Logging verbosity level
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the dataset from every speaker's videos
    Extract(ExtractArgs),
    /// Find the first spoken frame with a face and dump its features as JSON
    Probe(ProbeArgs),
    /// Build the vocabulary summary of a finished dataset
    Vocab {
        /// Dataset CSV produced by `extract`
        #[arg(short, long)]
        dataset: PathBuf,

        /// Where to write the vocabulary JSON
        #[arg(short, long, default_value = "vocabulary.json")]
        output: PathBuf,

        /// Word that marks silence and is left out of the vocabulary
        #[arg(long, default_value_t = String::from(DEFAULT_FILLER))]
        filler: String,
    },
    /// Copy the header and first rows of a dataset into a smaller file
    Sample {
        /// Dataset CSV produced by `extract`
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the sample
        #[arg(short, long)]
        output: PathBuf,

        /// Number of rows to copy
        #[arg(short, long, default_value_t = mouthmap::sample::DEFAULT_SAMPLE_ROWS)]
        rows: usize,
    },
}

/// Corpus layout and alignment options shared by `extract` and `probe`.
#[derive(Args, Debug)]
struct CorpusArgs {
    /// Video root: one `<speaker>/<speaker>/` directory of videos per speaker
    #[arg(long)]
    video_root: PathBuf,

    /// Alignment root: one `<speaker>/align/` directory per speaker
    #[arg(long)]
    align_root: PathBuf,

    /// Face landmark model file
    #[arg(short, long, default_value = "face_landmark.onnx")]
    model: PathBuf,

    /// Minimum face presence probability for a frame to count as having a face
    #[arg(long, default_value_t = 0.5)]
    presence_threshold: f32,

    /// Unit of the start/end columns in alignment files
    #[arg(long, value_enum, default_value_t = TimeBaseArg::Samples)]
    time_base: TimeBaseArg,

    /// Samples per second when `--time-base samples`
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: f64,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Output dataset CSV
    #[arg(short, long)]
    output: PathBuf,

    /// Directory for per-speaker partial files (defaults next to the output)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Number of parallel workers (defaults to the available cores)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// What to do when a video fails mid-decode
    #[arg(long, value_enum, default_value_t = DecodeErrorArg::SkipVideo)]
    on_decode_error: DecodeErrorArg,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Where to write the frame JSON
    #[arg(short, long, default_value = "frame.json")]
    output: PathBuf,

    /// Word that marks silence
    #[arg(long, default_value_t = String::from(DEFAULT_FILLER))]
    filler: String,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum TimeBaseArg {
    Samples,
    Seconds,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum DecodeErrorArg {
    SkipVideo,
    AbortSpeaker,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LogLevel {
    Error,
    Info,
    Debug,
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    let cli = Cli::parse();

    // 1. Initialize Logger
    let log_level = match cli.log_level {
        LogLevel::Error => "error",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("Starting Mouthmap...");

    // 2. Validate input paths
    for path in input_paths(&cli.command) {
        if !path.exists() {
            error!("Input path does not exist: {:?}", path);
            std::process::exit(1);
        }
    }

    // 3. Run the requested command
    if let Err(e) = dispatch(cli.command) {
        error!("Application failed: {:#}", e);
        std::process::exit(2);
    }

    info!("Processing completed successfully.");
}

fn input_paths(command: &Command) -> Vec<&Path> {
    match command {
        Command::Extract(args) => vec![&args.corpus.video_root, &args.corpus.align_root],
        Command::Probe(args) => vec![&args.corpus.video_root, &args.corpus.align_root],
        Command::Vocab { dataset, .. } => vec![dataset],
        Command::Sample { input, .. } => vec![input],
    }
    .into_iter()
    .map(PathBuf::as_path)
    .collect()
}

fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Extract(args) => {
            let mut config = corpus_config(&args.corpus, &args.output);
            if let Some(temp_dir) = args.temp_dir {
                config.temp_dir = temp_dir;
            }
            config.jobs = args.jobs;
            config.decode_failure_policy = match args.on_decode_error {
                DecodeErrorArg::SkipVideo => DecodeFailurePolicy::SkipVideo,
                DecodeErrorArg::AbortSpeaker => DecodeFailurePolicy::AbortSpeaker,
            };
            extract(&config, &args.corpus)
        }
        Command::Probe(args) => {
            let config = corpus_config(&args.corpus, &args.output);
            probe(&config, &args.corpus, &args.output, &args.filler)
        }
        Command::Vocab {
            dataset,
            output,
            filler,
        } => mouthmap::vocabulary::generate_vocabulary(&dataset, &output, &filler).map(|_| ()),
        Command::Sample {
            input,
            output,
            rows,
        } => mouthmap::sample::extract_sample(&input, &output, rows).map(|_| ()),
    }
}

fn corpus_config(corpus: &CorpusArgs, output: &Path) -> Config {
    let mut config = Config::new(&corpus.video_root, &corpus.align_root, output);
    config.time_base = match corpus.time_base {
        TimeBaseArg::Samples => TimeBase::Samples {
            rate: corpus.sample_rate,
        },
        TimeBaseArg::Seconds => TimeBase::Seconds,
    };
    config
}

#[cfg(feature = "onnx")]
fn extract(config: &Config, corpus: &CorpusArgs) -> Result<()> {
    use mouthmap::video_processor::FfmpegSource;

    let summary = mouthmap::run(config, &FfmpegSource, &face_mesh_factory(corpus))?;
    if !summary.failed.is_empty() {
        error!("Speakers that failed: {}", summary.failed.join(", "));
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn probe(config: &Config, corpus: &CorpusArgs, output: &Path, filler: &str) -> Result<()> {
    use anyhow::Context;
    use mouthmap::detector::DetectorFactory;
    use mouthmap::video_processor::FfmpegSource;

    let factory = face_mesh_factory(corpus);
    factory.ensure_available()?;
    match mouthmap::pipeline::probe_first_spoken_frame(config, &FfmpegSource, &factory, filler)? {
        Some(frame) => {
            info!(
                "Found frame #{} ('{}') at {:.2}s in {}/{}",
                frame.frame_idx, frame.word, frame.timestamp, frame.speaker, frame.video
            );
            std::fs::write(output, serde_json::to_string_pretty(&frame)?)
                .with_context(|| format!("Failed to write {:?}", output))?;
            info!("Frame data written to {:?}", output);
        }
        None => info!("No spoken frame with a detected face was found."),
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn face_mesh_factory(corpus: &CorpusArgs) -> mouthmap::detector::onnx::FaceMeshFactory {
    mouthmap::detector::onnx::FaceMeshFactory::new(&corpus.model)
        .with_presence_threshold(corpus.presence_threshold)
}

#[cfg(not(feature = "onnx"))]
fn extract(_config: &Config, _corpus: &CorpusArgs) -> Result<()> {
    Err(missing_backend())
}

#[cfg(not(feature = "onnx"))]
fn probe(_config: &Config, _corpus: &CorpusArgs, _output: &Path, _filler: &str) -> Result<()> {
    Err(missing_backend())
}

#[cfg(not(feature = "onnx"))]
fn missing_backend() -> anyhow::Error {
    anyhow::anyhow!("no landmark detector backend compiled in; rebuild with `--features onnx`")
}
