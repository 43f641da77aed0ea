//! Mouthmap - Core Library
//!
//! Builds a lip-reading dataset from a speaker video corpus: every video
//! frame with a detected face that falls inside a spoken word becomes one
//! row of mouth geometry (and, with the face-mesh model, expression and
//! whole-face landmark data). Speakers are processed in parallel into
//! private partial files, which are merged in speaker order at the end.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::fs::{self, File};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

pub mod alignment;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod landmarks;
pub mod pipeline;
pub mod sample;
pub mod video_processor;
pub mod vocabulary;

use alignment::TimeBase;
use dataset::SchemaVariant;
use detector::DetectorFactory;
use pipeline::SpeakerOutcome;
use video_processor::FrameSource;

pub const DEFAULT_VIDEO_EXTENSIONS: [&str; 2] = ["mpg", "mp4"];
pub const DEFAULT_ALIGN_EXTENSION: &str = "align";
pub const DEFAULT_FILLER: &str = "sil";

/// What a speaker's work unit does when a video fails mid-decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// Log the failure, keep rows already written, move on to the next video.
    #[default]
    SkipVideo,
    /// Stop the speaker; rows written so far stay in its partial output.
    AbortSpeaker,
}

/// Application configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub video_root: PathBuf,
    pub align_root: PathBuf,
    pub output_csv: PathBuf,
    /// Where per-speaker partial files are written before the merge.
    pub temp_dir: PathBuf,
    pub time_base: TimeBase,
    pub video_extensions: Vec<String>,
    pub align_extension: String,
    /// Worker count; `None` uses the available parallelism.
    pub jobs: Option<usize>,
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl Config {
    /// A configuration with the GRID corpus defaults. Partials go to a hidden
    /// directory next to the output file.
    pub fn new(video_root: &Path, align_root: &Path, output_csv: &Path) -> Self {
        let output_dir = output_csv.parent().unwrap_or(Path::new("."));
        Self {
            video_root: video_root.to_path_buf(),
            align_root: align_root.to_path_buf(),
            output_csv: output_csv.to_path_buf(),
            temp_dir: output_dir.join(".mouthmap-partial"),
            time_base: TimeBase::default(),
            video_extensions: DEFAULT_VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            align_extension: DEFAULT_ALIGN_EXTENSION.to_string(),
            jobs: None,
            decode_failure_policy: DecodeFailurePolicy::default(),
        }
    }
}

/// Totals for a finished extraction run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub speakers: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
    pub rows: u64,
}

/// Speaker identifiers: the subdirectory names of `video_root`, sorted.
pub fn list_speakers(video_root: &Path) -> Result<Vec<String>> {
    let mut speakers = Vec::new();
    let entries = fs::read_dir(video_root)
        .with_context(|| format!("Failed to read video root {:?}", video_root))?;
    for entry in entries {
        let entry = entry?;
        if entry.path().is_dir() {
            speakers.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    speakers.sort();
    Ok(speakers)
}

pub fn partial_path(temp_dir: &Path, speaker: &str) -> PathBuf {
    temp_dir.join(format!("{speaker}.csv"))
}

/// The main function that orchestrates dataset extraction.
///
/// Checks the detector is usable, fans speakers out over a worker pool,
/// waits for every unit, then merges their partial outputs in speaker order.
/// A failing unit is reported in the summary and never stops its siblings.
pub fn run<S, F>(config: &Config, source: &S, factory: &F) -> Result<ExtractionSummary>
where
    S: FrameSource,
    F: DetectorFactory,
{
    info!("Initializing extraction with config: {:?}", config);
    factory
        .ensure_available()
        .context("Landmark detector is not available")?;
    let schema = factory.landmark_model().schema();

    let speakers = list_speakers(&config.video_root)?;
    info!("Found {} speakers to process", speakers.len());

    fs::create_dir_all(&config.temp_dir)
        .with_context(|| format!("Failed to create temp directory {:?}", config.temp_dir))?;
    clear_partials(&speakers, &config.temp_dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs.unwrap_or(0))
        .build()
        .context("Failed to build worker pool")?;
    info!("Using {} workers", pool.current_num_threads());

    let pb = ProgressBar::new(speakers.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Speakers [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) [{elapsed_precise}<{eta}]")?
            .progress_chars("##-"),
    );

    let outcomes: Vec<(String, Result<SpeakerOutcome>)> = pool.install(|| {
        speakers
            .par_iter()
            .map(|speaker| {
                let partial = partial_path(&config.temp_dir, speaker);
                let outcome = run_unit(config, source, factory, speaker, &partial);
                pb.inc(1);
                (speaker.clone(), outcome)
            })
            .collect()
    });
    pb.finish_with_message("All speakers processed");

    let mut summary = ExtractionSummary {
        speakers: speakers.len(),
        ..Default::default()
    };
    for (speaker, outcome) in outcomes {
        match outcome {
            Ok(SpeakerOutcome::Completed { .. }) => summary.completed += 1,
            Ok(SpeakerOutcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                error!("[{}] Speaker failed: {:#}", speaker, err);
                summary.failed.push(speaker);
            }
        }
    }

    info!("Merging partial outputs into {:?}", config.output_csv);
    summary.rows = merge_partials(&speakers, &config.temp_dir, &config.output_csv, schema)?;
    info!(
        "Wrote {} rows ({} speakers completed, {} skipped, {} failed)",
        summary.rows,
        summary.completed,
        summary.skipped,
        summary.failed.len()
    );
    Ok(summary)
}

/// Removes partials left in `temp_dir` by an earlier run that never reached
/// its merge. Every partial the merge reads must come from this run.
fn clear_partials(speakers: &[String], temp_dir: &Path) -> Result<()> {
    for speaker in speakers {
        let path = partial_path(temp_dir, speaker);
        if path.exists() {
            warn!("[{}] Removing stale partial output {:?}", speaker, path);
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale partial output {:?}", path))?;
        }
    }
    Ok(())
}

/// Runs one speaker unit, turning a panic into an error for that speaker.
fn run_unit<S, F>(
    config: &Config,
    source: &S,
    factory: &F,
    speaker: &str,
    partial: &Path,
) -> Result<SpeakerOutcome>
where
    S: FrameSource,
    F: DetectorFactory,
{
    panic::catch_unwind(AssertUnwindSafe(|| {
        pipeline::process_speaker(config, source, factory, speaker, partial)
    }))
    .unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(anyhow::anyhow!("worker panicked: {}", message))
    })
}

/// Concatenates per-speaker partials into `output`, in `speakers` order,
/// under a single header row. Returns the number of rows written.
///
/// Missing partials are skipped. Records with the wrong field count (a
/// partial cut off mid-write) are dropped. Partials are deleted once merged
/// and `temp_dir` is removed if it ends up empty.
pub fn merge_partials(
    speakers: &[String],
    temp_dir: &Path,
    output: &Path,
    schema: SchemaVariant,
) -> Result<u64> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create output parent directory")?;
        }
    }
    let file = File::create(output)
        .with_context(|| format!("Failed to create dataset file {:?}", output))?;
    let mut writer = dataset::csv_writer(file);
    writer.write_record(schema.header())?;

    let expected = schema.column_count();
    let mut rows = 0u64;
    for speaker in speakers {
        let path = partial_path(temp_dir, speaker);
        if !path.exists() {
            continue;
        }

        let mut reader = dataset::csv_reader_builder(false)
            .from_path(&path)
            .with_context(|| format!("Failed to open partial output {:?}", path))?;
        let mut merged = 0u64;
        for record in reader.records() {
            match record {
                Ok(record) if record.len() == expected => {
                    writer.write_record(&record)?;
                    merged += 1;
                }
                Ok(record) => warn!(
                    "[{}] Dropping malformed row with {} fields (expected {})",
                    speaker,
                    record.len(),
                    expected
                ),
                Err(err) => {
                    warn!("[{}] Stopped reading partial output: {}", speaker, err);
                    break;
                }
            }
        }
        drop(reader);

        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove partial output {:?}", path))?;
        info!("Merged {} ({} rows)", speaker, merged);
        rows += merged;
    }
    writer.flush().context("Failed to flush dataset file")?;

    // Only succeeds when nothing else is left in the directory.
    let _ = fs::remove_dir(temp_dir);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_partial(dir: &Path, speaker: &str, body: &str) {
        let mut file = File::create(partial_path(dir, speaker)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn merge_keeps_speaker_order_and_skips_missing_partials() {
        let root = tempfile::tempdir().unwrap();
        let temp = root.path().join("partials");
        fs::create_dir_all(&temp).unwrap();
        // Written out of order on purpose; s2 never produced a partial.
        write_partial(&temp, "s3", "s3;v.mpg;0;c;1;1;[];[]\n");
        write_partial(&temp, "s1", "s1;v.mpg;0;a;1;1;[];[]\ns1;v.mpg;1;a;1;1;[];[]\n");

        let output = root.path().join("out").join("data.csv");
        let speakers = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let rows = merge_partials(&speakers, &temp, &output, SchemaVariant::Minimal).unwrap();
        assert_eq!(rows, 3);

        let text = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], SchemaVariant::Minimal.header().join(";"));
        assert_eq!(
            &lines[1..],
            [
                "s1;v.mpg;0;a;1;1;[];[]",
                "s1;v.mpg;1;a;1;1;[];[]",
                "s3;v.mpg;0;c;1;1;[];[]"
            ]
        );
        assert!(!temp.exists(), "empty temp dir is removed");
    }

    #[test]
    fn merge_drops_truncated_trailing_row() {
        let root = tempfile::tempdir().unwrap();
        let temp = root.path().to_path_buf();
        write_partial(&temp, "s1", "s1;v.mpg;0;a;1;1;[];[]\ns1;v.mpg;1;a;1");

        let output = root.path().join("data.csv");
        let rows =
            merge_partials(&["s1".to_string()], &temp, &output, SchemaVariant::Minimal).unwrap();
        assert_eq!(rows, 1);
        assert!(!partial_path(&temp, "s1").exists());
    }

    #[test]
    fn speakers_are_sorted_directories_only() {
        let root = tempfile::tempdir().unwrap();
        for name in ["s10", "s2", "s1"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        File::create(root.path().join("notes.txt")).unwrap();
        assert_eq!(list_speakers(root.path()).unwrap(), vec!["s1", "s10", "s2"]);
    }
}
