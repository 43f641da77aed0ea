//! Vocabulary Module
//!
//! Summarizes a finished dataset: which words occur, how often, and for
//! which speakers. Filler rows (silence) are left out of every count.

use crate::dataset;
use anyhow::{anyhow, Context, Result};
use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// How many of the most frequent words get logged.
const TOP_WORDS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vocabulary {
    pub vocabulary: Vec<String>,
    pub vocab_size: usize,
    pub word_counts: BTreeMap<String, u64>,
    pub total_frames: u64,
    pub total_speakers: usize,
    pub speakers: Vec<String>,
}

/// Scans dataset rows (with header) from `reader`.
pub fn build_vocabulary<R: Read>(reader: R, filler: &str) -> Result<Vocabulary> {
    let mut rows = dataset::csv_reader_builder(true).from_reader(reader);
    let headers = rows.headers().context("Dataset has no header row")?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("Dataset header has no '{}' column", name))
    };
    let word_col = column("word")?;
    let speaker_col = column("speaker")?;

    let mut word_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut speakers = BTreeSet::new();
    let mut total_frames = 0u64;
    for record in rows.records() {
        let record = record.context("Failed to read dataset row")?;
        let word = record.get(word_col).unwrap_or("").trim();
        let speaker = record.get(speaker_col).unwrap_or("").trim();
        if word.is_empty() || speaker.is_empty() || word == filler {
            continue;
        }
        *word_counts.entry(word.to_string()).or_default() += 1;
        speakers.insert(speaker.to_string());
        total_frames += 1;
    }

    let vocabulary: Vec<String> = word_counts.keys().cloned().collect();
    Ok(Vocabulary {
        vocab_size: vocabulary.len(),
        vocabulary,
        word_counts,
        total_frames,
        total_speakers: speakers.len(),
        speakers: speakers.into_iter().collect(),
    })
}

/// Builds the vocabulary for the dataset at `dataset_path` and writes it as
/// pretty JSON to `output`.
pub fn generate_vocabulary(dataset_path: &Path, output: &Path, filler: &str) -> Result<Vocabulary> {
    info!("Generating vocabulary from {:?}", dataset_path);
    let file = File::open(dataset_path)
        .with_context(|| format!("Dataset not found: {:?}", dataset_path))?;
    let vocab = build_vocabulary(file, filler)?;

    fs::write(output, serde_json::to_string_pretty(&vocab)?)
        .with_context(|| format!("Failed to write vocabulary to {:?}", output))?;

    info!(
        "Vocabulary written to {:?}: {} words, {} frames (without '{}'), {} speakers",
        output, vocab.vocab_size, vocab.total_frames, filler, vocab.total_speakers
    );
    for (rank, (word, count)) in most_frequent(&vocab, TOP_WORDS).into_iter().enumerate() {
        info!("{:2}. {:15} {:6} frames", rank + 1, word, count);
    }
    Ok(vocab)
}

/// The `n` most frequent words, highest count first, ties by word.
pub fn most_frequent(vocab: &Vocabulary, n: usize) -> Vec<(&str, u64)> {
    let mut counts: Vec<(&str, u64)> = vocab
        .word_counts
        .iter()
        .map(|(word, count)| (word.as_str(), *count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    counts.truncate(n);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = "\
speaker;video;frame_idx;word;mouth_center_x;mouth_center_y;outer_lip_relative_points;inner_lip_relative_points
s1;a.mpg;0;sil;1;1;[];[]
s1;a.mpg;1;bin;1;1;[];[]
s1;a.mpg;2;bin;1;1;[];[]
s2;b.mpg;5;blue;1;1;[];[]
s3;c.mpg;0;sil;1;1;[];[]
";

    #[test]
    fn filler_rows_are_excluded() {
        let vocab = build_vocabulary(DATASET.as_bytes(), "sil").unwrap();
        assert_eq!(vocab.vocabulary, vec!["bin", "blue"]);
        assert_eq!(vocab.vocab_size, 2);
        assert_eq!(vocab.word_counts["bin"], 2);
        assert_eq!(vocab.total_frames, 3);
        // s3 only has silence.
        assert_eq!(vocab.speakers, vec!["s1", "s2"]);
        assert_eq!(vocab.total_speakers, 2);
    }

    #[test]
    fn most_frequent_orders_by_count() {
        let vocab = build_vocabulary(DATASET.as_bytes(), "sil").unwrap();
        assert_eq!(most_frequent(&vocab, 1), vec![("bin", 2)]);
    }

    #[test]
    fn missing_word_column_is_an_error() {
        let err = build_vocabulary("speaker;video\ns1;a.mpg\n".as_bytes(), "sil").unwrap_err();
        assert!(err.to_string().contains("word"));
    }

    #[test]
    fn writes_json_with_expected_keys() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_path = dir.path().join("data.csv");
        let output = dir.path().join("vocabulary.json");
        fs::write(&dataset_path, DATASET).unwrap();

        generate_vocabulary(&dataset_path, &output, "sil").unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        for key in [
            "vocabulary",
            "vocab_size",
            "word_counts",
            "total_frames",
            "total_speakers",
            "speakers",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }
}
