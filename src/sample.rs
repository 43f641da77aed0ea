//! Sample Module
//!
//! Copies the head of a large dataset into a small file for inspection.

use crate::dataset;
use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::path::Path;

pub const DEFAULT_SAMPLE_ROWS: usize = 1000;

/// Writes the header and the first `rows` records of `input` to `output`.
/// Returns how many records were copied.
pub fn extract_sample(input: &Path, output: &Path, rows: usize) -> Result<usize> {
    let mut reader = dataset::csv_reader_builder(true)
        .from_path(input)
        .with_context(|| format!("Failed to open dataset {:?}", input))?;
    let header = reader.headers().context("Dataset has no header row")?.clone();

    let file = File::create(output)
        .with_context(|| format!("Failed to create sample file {:?}", output))?;
    let mut writer = dataset::csv_writer(file);
    writer.write_record(&header)?;

    let mut copied = 0;
    for record in reader.records().take(rows) {
        writer.write_record(&record?)?;
        copied += 1;
    }
    writer.flush()?;

    info!(
        "Sample written to {:?}: {} rows x {} columns",
        output,
        copied,
        header.len()
    );
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn copies_header_and_first_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.csv");
        let output = dir.path().join("sample.csv");
        fs::write(&input, "speaker;word\ns1;a\ns1;b\ns2;c\n").unwrap();

        assert_eq!(extract_sample(&input, &output, 2).unwrap(), 2);
        assert_eq!(fs::read_to_string(&output).unwrap(), "speaker;word\ns1;a\ns1;b\n");
    }

    #[test]
    fn short_dataset_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("data.csv");
        let output = dir.path().join("sample.csv");
        fs::write(&input, "speaker;word\ns1;a\n").unwrap();

        assert_eq!(extract_sample(&input, &output, 10).unwrap(), 1);
    }
}
