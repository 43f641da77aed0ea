//! Pipeline Module
//!
//! The per-video driver (decode, extract, resolve, emit) and the per-speaker
//! work unit that runs it over every video of one speaker.

use crate::alignment::{self, WordInterval};
use crate::dataset::{DatasetRow, RowSink};
use crate::detector::{DetectorFactory, LandmarkDetector};
use crate::error::AlignmentError;
use crate::landmarks::{self, FrameFeatures, LandmarkModel};
use crate::video_processor::FrameSource;
use crate::{Config, DecodeFailurePolicy};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Frame counts for one processed video.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VideoStats {
    pub frames: u64,
    pub rows: u64,
    pub no_face: u64,
    pub no_word: u64,
}

/// How a speaker's work unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakerOutcome {
    /// The speaker's video directory does not exist.
    Skipped,
    Completed {
        videos: usize,
        skipped_videos: usize,
        rows: u64,
    },
}

/// Directory holding a speaker's videos: `<video_root>/<speaker>/<speaker>`.
pub fn speaker_video_dir(video_root: &Path, speaker: &str) -> PathBuf {
    video_root.join(speaker).join(speaker)
}

/// Directory holding a speaker's alignments: `<align_root>/<speaker>/align`.
pub fn speaker_align_dir(align_root: &Path, speaker: &str) -> PathBuf {
    align_root.join(speaker).join("align")
}

/// Alignment path for a video: same base name, `extension` swapped in.
pub fn alignment_path_for(align_dir: &Path, video_path: &Path, extension: &str) -> PathBuf {
    let mut name = video_path.file_stem().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(extension);
    align_dir.join(name)
}

/// Lists video files in `dir` whose extension is in `extensions`
/// (case-insensitive), sorted by file name.
pub fn list_videos(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let accepted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)));
        if accepted {
            videos.push(path);
        }
    }
    videos.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(videos)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Frame rate of `video_path`, rejecting rates that cannot time frames.
fn checked_frame_rate<S: FrameSource + ?Sized>(source: &S, video_path: &Path) -> Result<f64> {
    let fps = source.frame_rate(video_path)?;
    if !(fps > 0.0 && fps.is_finite()) {
        return Err(anyhow!("Invalid frame rate {} for {:?}", fps, video_path));
    }
    Ok(fps)
}

/// Runs one video through the detector and resolver, calling `emit` for
/// every frame that has both a face and a word.
///
/// Frames are numbered from 0 in decode order and timed as
/// `frame_idx / fps`. Frames without a face or outside every interval are
/// dropped.
pub fn process_video<S, D>(
    source: &S,
    detector: &mut D,
    model: LandmarkModel,
    speaker: &str,
    video_path: &Path,
    words: &[WordInterval],
    emit: &mut dyn FnMut(DatasetRow) -> Result<()>,
) -> Result<VideoStats>
where
    S: FrameSource + ?Sized,
    D: LandmarkDetector + ?Sized,
{
    let fps = checked_frame_rate(source, video_path)?;
    let video = file_name(video_path);
    let mut stats = VideoStats::default();

    source.for_each_frame(video_path, &mut |frame| {
        let frame_idx = stats.frames;
        stats.frames += 1;

        let Some(features) = landmarks::extract_features(&frame, &mut *detector, model)? else {
            stats.no_face += 1;
            debug!("{}/{} frame {}: no face", speaker, video, frame_idx);
            return Ok(ControlFlow::Continue(()));
        };

        let timestamp = frame_idx as f64 / fps;
        let Some(interval) = alignment::resolve_word(words, timestamp) else {
            stats.no_word += 1;
            debug!("{}/{} frame {}: no word at {:.3}s", speaker, video, frame_idx, timestamp);
            return Ok(ControlFlow::Continue(()));
        };

        emit(DatasetRow {
            speaker: speaker.to_string(),
            video: video.clone(),
            frame_idx,
            word: interval.word.clone(),
            features,
        })?;
        stats.rows += 1;
        Ok(ControlFlow::Continue(()))
    })?;

    Ok(stats)
}

/// Processes every video of one speaker into a private, headerless partial
/// file at `partial_path`.
///
/// The detector is built here and dropped when the unit returns. A missing
/// video directory skips the speaker without creating the partial file.
pub fn process_speaker<S, F>(
    config: &Config,
    source: &S,
    factory: &F,
    speaker: &str,
    partial_path: &Path,
) -> Result<SpeakerOutcome>
where
    S: FrameSource + ?Sized,
    F: DetectorFactory + ?Sized,
{
    let video_dir = speaker_video_dir(&config.video_root, speaker);
    let align_dir = speaker_align_dir(&config.align_root, speaker);

    if !video_dir.is_dir() {
        warn!("[{}] Video directory {:?} not found, skipping speaker", speaker, video_dir);
        return Ok(SpeakerOutcome::Skipped);
    }
    info!("[{}] Processing started", speaker);

    let videos = list_videos(&video_dir, &config.video_extensions)?;
    let model = factory.landmark_model();
    let mut detector = factory
        .create()
        .with_context(|| format!("[{}] Failed to create landmark detector", speaker))?;
    let mut sink = RowSink::create(partial_path, model.schema())?;

    let mut processed = 0;
    let mut skipped = 0;
    for video_path in &videos {
        let video = file_name(video_path);
        let align_path = alignment_path_for(&align_dir, video_path, &config.align_extension);

        let words = match alignment::parse_alignment_file(&align_path, config.time_base) {
            Ok(words) => words,
            Err(AlignmentError::NotFound { .. }) => {
                warn!("[{}] Missing align file for {}, skipping", speaker, video);
                skipped += 1;
                continue;
            }
            Err(err) => {
                warn!("[{}] Unreadable align file for {}: {}, skipping", speaker, video, err);
                skipped += 1;
                continue;
            }
        };

        let result = process_video(
            source,
            &mut detector,
            model,
            speaker,
            video_path,
            &words,
            &mut |row| sink.write_row(&row),
        );
        match result {
            Ok(stats) => {
                processed += 1;
                info!(
                    "[{}] Processed {}: {} frames, {} rows ({} without face, {} without word)",
                    speaker, video, stats.frames, stats.rows, stats.no_face, stats.no_word
                );
            }
            Err(err) => match config.decode_failure_policy {
                DecodeFailurePolicy::SkipVideo => {
                    warn!("[{}] Failed on {}: {:#}, skipping video", speaker, video, err);
                    skipped += 1;
                }
                DecodeFailurePolicy::AbortSpeaker => {
                    sink.flush()?;
                    return Err(err.context(format!("[{}] Aborted on {}", speaker, video)));
                }
            },
        }
    }

    sink.flush()?;
    info!("[{}] Completed all videos ({} rows)", speaker, sink.rows());
    Ok(SpeakerOutcome::Completed {
        videos: processed,
        skipped_videos: skipped,
        rows: sink.rows(),
    })
}

/// The first spoken, face-bearing frame found by `probe_first_spoken_frame`.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub speaker: String,
    pub video: String,
    pub frame_idx: u64,
    pub word: String,
    pub fps: f64,
    pub timestamp: f64,
    pub features: FrameFeatures,
}

/// Scans the first video of the first speaker (both in sorted order) for the
/// earliest frame whose word is not `filler` and which has a detected face.
///
/// Decoding stops at that frame. Returns `None` if no such frame exists.
pub fn probe_first_spoken_frame<S, F>(
    config: &Config,
    source: &S,
    factory: &F,
    filler: &str,
) -> Result<Option<ProbeResult>>
where
    S: FrameSource + ?Sized,
    F: DetectorFactory + ?Sized,
{
    let speaker = crate::list_speakers(&config.video_root)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No speaker directories under {:?}", config.video_root))?;
    let video_dir = speaker_video_dir(&config.video_root, &speaker);
    let video_path = list_videos(&video_dir, &config.video_extensions)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No videos in {:?}", video_dir))?;
    let align_path = alignment_path_for(
        &speaker_align_dir(&config.align_root, &speaker),
        &video_path,
        &config.align_extension,
    );
    let words = alignment::parse_alignment_file(&align_path, config.time_base)?;

    let model = factory.landmark_model();
    let mut detector = factory.create()?;
    let fps = checked_frame_rate(source, &video_path)?;
    let video = file_name(&video_path);
    info!("Probing {}/{} at {:.2} fps", speaker, video, fps);

    let mut found = None;
    let mut frame_idx = 0u64;
    source.for_each_frame(&video_path, &mut |frame| {
        let timestamp = frame_idx as f64 / fps;
        let current = frame_idx;
        frame_idx += 1;

        let Some(interval) = alignment::resolve_word(&words, timestamp) else {
            return Ok(ControlFlow::Continue(()));
        };
        if interval.word == filler {
            return Ok(ControlFlow::Continue(()));
        }
        let Some(features) = landmarks::extract_features(&frame, &mut detector, model)? else {
            return Ok(ControlFlow::Continue(()));
        };

        found = Some(ProbeResult {
            speaker: speaker.clone(),
            video: video.clone(),
            frame_idx: current,
            word: interval.word.clone(),
            fps,
            timestamp,
            features,
        });
        Ok(ControlFlow::Break(()))
    })?;

    Ok(found)
}
