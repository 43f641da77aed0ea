//! Alignment Module
//!
//! Loads word-level transcripts (`<start> <end> <word>` per line) and maps
//! frame timestamps back onto the spoken word.

use crate::error::AlignmentError;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Sample rate of the GRID corpus alignment files.
pub const DEFAULT_SAMPLE_RATE: f64 = 25_000.0;

/// How the `<start>`/`<end>` columns of an alignment file are interpreted.
///
/// This is a pipeline-wide choice; every alignment file in one run is read
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeBase {
    /// Raw sample counts, divided by `rate` to get seconds.
    Samples { rate: f64 },
    /// Values are already seconds.
    Seconds,
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase::Samples {
            rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl TimeBase {
    fn to_seconds(self, value: f64) -> f64 {
        match self {
            TimeBase::Samples { rate } => value / rate,
            TimeBase::Seconds => value,
        }
    }
}

/// One word of a transcript with its closed time interval in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct WordInterval {
    pub word: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl WordInterval {
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start_seconds <= timestamp && timestamp <= self.end_seconds
    }
}

/// Reads an alignment file into intervals, in file order.
pub fn parse_alignment_file(
    path: &Path,
    time_base: TimeBase,
) -> Result<Vec<WordInterval>, AlignmentError> {
    let text = fs::read_to_string(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            AlignmentError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            AlignmentError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_alignment(&text, time_base, path)
}

/// Parses alignment text. `origin` is only used in error messages.
///
/// Lines with fewer than three tokens are skipped; tokens after the word are
/// ignored. No ordering checks are made.
pub fn parse_alignment(
    text: &str,
    time_base: TimeBase,
    origin: &Path,
) -> Result<Vec<WordInterval>, AlignmentError> {
    let mut intervals = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[start, end, word, ..] = tokens.as_slice() else {
            continue;
        };
        let parse = |value: &str| {
            value
                .parse::<f64>()
                .map_err(|_| AlignmentError::InvalidNumber {
                    path: origin.to_path_buf(),
                    line: line_no + 1,
                    value: value.to_string(),
                })
        };
        intervals.push(WordInterval {
            word: word.to_string(),
            start_seconds: time_base.to_seconds(parse(start)?),
            end_seconds: time_base.to_seconds(parse(end)?),
        });
    }
    Ok(intervals)
}

/// Returns the first interval (in file order) whose closed range contains
/// `timestamp`. Overlapping intervals resolve to the earliest one.
pub fn resolve_word(intervals: &[WordInterval], timestamp: f64) -> Option<&WordInterval> {
    intervals.iter().find(|interval| interval.contains(timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(word: &str, start: f64, end: f64) -> WordInterval {
        WordInterval {
            word: word.to_string(),
            start_seconds: start,
            end_seconds: end,
        }
    }

    #[test]
    fn converts_sample_counts_to_seconds() {
        let text = "0 25000 sil\n25000 50000 bin\n";
        let parsed = parse_alignment(text, TimeBase::default(), Path::new("t.align")).unwrap();
        assert_eq!(
            parsed,
            vec![interval("sil", 0.0, 1.0), interval("bin", 1.0, 2.0)]
        );
    }

    #[test]
    fn short_lines_are_dropped_without_touching_neighbours() {
        let text = "0 25000 sil\n\n25000 50000\n   \n50000 75000 blue extra tokens\n";
        let parsed = parse_alignment(text, TimeBase::default(), Path::new("t.align")).unwrap();
        assert_eq!(
            parsed,
            vec![interval("sil", 0.0, 1.0), interval("blue", 2.0, 3.0)]
        );
    }

    #[test]
    fn seconds_time_base_passes_values_through() {
        let text = "0.5 1.25 lay";
        let parsed = parse_alignment(text, TimeBase::Seconds, Path::new("t.align")).unwrap();
        assert_eq!(parsed, vec![interval("lay", 0.5, 1.25)]);
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "0 1000 a\n500 2000 b\n100 300 c\n";
        let first = parse_alignment(text, TimeBase::default(), Path::new("t.align")).unwrap();
        let second = parse_alignment(text, TimeBase::default(), Path::new("t.align")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn non_numeric_bounds_are_reported_with_line() {
        let text = "0 25000 sil\nabc 50000 bin\n";
        let err = parse_alignment(text, TimeBase::default(), Path::new("t.align")).unwrap_err();
        match err {
            AlignmentError::InvalidNumber { line, value, .. } => {
                assert_eq!(line, 2);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_alignment_file(&dir.path().join("nope.align"), TimeBase::default())
            .unwrap_err();
        assert!(matches!(err, AlignmentError::NotFound { .. }));
    }

    #[test]
    fn overlapping_intervals_resolve_to_first() {
        let intervals = vec![interval("a", 0.0, 2.0), interval("b", 1.0, 3.0)];
        assert_eq!(resolve_word(&intervals, 1.5).unwrap().word, "a");
        assert_eq!(resolve_word(&intervals, 2.5).unwrap().word, "b");
    }

    #[test]
    fn interval_bounds_are_inclusive() {
        let intervals = vec![interval("a", 1.0, 2.0)];
        assert_eq!(resolve_word(&intervals, 1.0).unwrap().word, "a");
        assert_eq!(resolve_word(&intervals, 2.0).unwrap().word, "a");
        assert!(resolve_word(&intervals, 0.999).is_none());
        assert!(resolve_word(&intervals, 2.001).is_none());
    }
}
