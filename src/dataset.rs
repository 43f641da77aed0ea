//! Dataset Module
//!
//! Column layout of the output CSV and the writers that produce it. Every
//! composite value (point lists, score maps) is stored as one compact JSON
//! string per cell.

use crate::landmarks::FrameFeatures;
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, Writer, WriterBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const DELIMITER: u8 = b';';

const MINIMAL_COLUMNS: [&str; 8] = [
    "speaker",
    "video",
    "frame_idx",
    "word",
    "mouth_center_x",
    "mouth_center_y",
    "outer_lip_relative_points",
    "inner_lip_relative_points",
];

const EXTENDED_COLUMNS: [&str; 10] = [
    "blend_shapes",
    "mouth_blend_shapes",
    "eyes_blend_shapes",
    "brow_blend_shapes",
    "face_shape_blend_shapes",
    "3d_landmarks",
    "pixel_landmarks",
    "relative_landmarks",
    "face_center_pixel",
    "face_center_3d",
];

/// Which column set a dataset file uses. One file never mixes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    Minimal,
    Extended,
}

impl SchemaVariant {
    pub fn header(self) -> Vec<&'static str> {
        let mut columns = MINIMAL_COLUMNS.to_vec();
        if self == SchemaVariant::Extended {
            columns.extend_from_slice(&EXTENDED_COLUMNS);
        }
        columns
    }

    pub fn column_count(self) -> usize {
        match self {
            SchemaVariant::Minimal => MINIMAL_COLUMNS.len(),
            SchemaVariant::Extended => MINIMAL_COLUMNS.len() + EXTENDED_COLUMNS.len(),
        }
    }
}

/// One output row: a frame that had a face and fell inside a word.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub speaker: String,
    pub video: String,
    pub frame_idx: u64,
    pub word: String,
    pub features: FrameFeatures,
}

impl DatasetRow {
    /// Renders the row as CSV fields for `schema`.
    pub fn to_record(&self, schema: SchemaVariant) -> Result<Vec<String>> {
        let f = &self.features;
        let mut record = vec![
            self.speaker.clone(),
            self.video.clone(),
            self.frame_idx.to_string(),
            self.word.clone(),
            f.mouth_center[0].to_string(),
            f.mouth_center[1].to_string(),
            json(&f.outer_lip_relative_points)?,
            json(&f.inner_lip_relative_points)?,
        ];

        match (schema, &f.face) {
            (SchemaVariant::Minimal, None) => {}
            (SchemaVariant::Extended, Some(face)) => {
                record.extend([
                    json(&face.blend_shapes)?,
                    json(&face.mouth_blend_shapes)?,
                    json(&face.eyes_blend_shapes)?,
                    json(&face.brow_blend_shapes)?,
                    json(&face.face_shape_blend_shapes)?,
                    json(&face.landmarks_3d)?,
                    json(&face.pixel_landmarks)?,
                    json(&face.relative_landmarks)?,
                    json(&face.face_center_pixel)?,
                    json(&face.face_center_3d)?,
                ]);
            }
            (schema, _) => bail!(
                "row for {}/{} frame {} does not match the {:?} schema",
                self.speaker,
                self.video,
                self.frame_idx,
                schema
            ),
        }
        Ok(record)
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode dataset cell as JSON")
}

pub fn csv_writer<W: Write>(inner: W) -> Writer<W> {
    WriterBuilder::new().delimiter(DELIMITER).from_writer(inner)
}

/// Reader for dataset files. `has_headers` is false for per-speaker partials.
pub fn csv_reader_builder(has_headers: bool) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .delimiter(DELIMITER)
        .has_headers(has_headers)
        .flexible(true);
    builder
}

/// Writes headerless rows of one schema variant.
pub struct RowSink<W: Write> {
    writer: Writer<W>,
    schema: SchemaVariant,
    rows: u64,
}

impl RowSink<File> {
    pub fn create(path: &Path, schema: SchemaVariant) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {:?}", path))?;
        Ok(Self::new(file, schema))
    }
}

impl<W: Write> RowSink<W> {
    pub fn new(inner: W, schema: SchemaVariant) -> Self {
        Self {
            writer: csv_writer(inner),
            schema,
            rows: 0,
        }
    }

    pub fn write_row(&mut self, row: &DatasetRow) -> Result<()> {
        let record = row.to_record(self.schema)?;
        self.writer
            .write_record(&record)
            .context("Failed to write dataset row")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush dataset rows")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::FaceFeatures;
    use std::collections::BTreeMap;

    fn minimal_row() -> DatasetRow {
        DatasetRow {
            speaker: "s1".into(),
            video: "bbaf2n.mpg".into(),
            frame_idx: 12,
            word: "bin".into(),
            features: FrameFeatures {
                mouth_center: [120, 201],
                outer_lip_relative_points: vec![[-3, 1], [4, -2]],
                inner_lip_relative_points: vec![[0, 1]],
                face: None,
            },
        }
    }

    #[test]
    fn headers_are_fixed_per_variant() {
        assert_eq!(SchemaVariant::Minimal.header().len(), 8);
        assert_eq!(SchemaVariant::Extended.header().len(), 18);
        assert_eq!(
            SchemaVariant::Extended.header()[..8],
            SchemaVariant::Minimal.header()[..]
        );
        assert_eq!(SchemaVariant::Extended.header()[13], "3d_landmarks");
        assert_eq!(
            SchemaVariant::Extended.header(),
            SchemaVariant::Extended.header()
        );
    }

    #[test]
    fn minimal_row_renders_compact_json() {
        let record = minimal_row().to_record(SchemaVariant::Minimal).unwrap();
        assert_eq!(
            record,
            vec!["s1", "bbaf2n.mpg", "12", "bin", "120", "201", "[[-3,1],[4,-2]]", "[[0,1]]"]
        );
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        assert!(minimal_row().to_record(SchemaVariant::Extended).is_err());

        let mut row = minimal_row();
        row.features.face = Some(FaceFeatures {
            blend_shapes: BTreeMap::new(),
            mouth_blend_shapes: BTreeMap::new(),
            eyes_blend_shapes: BTreeMap::new(),
            brow_blend_shapes: BTreeMap::new(),
            face_shape_blend_shapes: BTreeMap::new(),
            landmarks_3d: vec![[0.5, 0.25, -0.0625]],
            pixel_landmarks: vec![[10, 20]],
            relative_landmarks: vec![[0, 0]],
            face_center_pixel: [10, 20],
            face_center_3d: [0.5, 0.25, -0.0625],
        });
        assert!(row.to_record(SchemaVariant::Minimal).is_err());
        let record = row.to_record(SchemaVariant::Extended).unwrap();
        assert_eq!(record.len(), SchemaVariant::Extended.column_count());
        assert_eq!(record[13], "[[0.5,0.25,-0.0625]]");
        assert_eq!(record[17], "[0.5,0.25,-0.0625]");
    }

    #[test]
    fn sink_writes_semicolon_rows_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1.csv");
        let mut sink = RowSink::create(&path, SchemaVariant::Minimal).unwrap();
        sink.write_row(&minimal_row()).unwrap();
        assert_eq!(sink.rows(), 1);
        sink.flush().unwrap();
        drop(sink);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "s1;bbaf2n.mpg;12;bin;120;201;[[-3,1],[4,-2]];[[0,1]]\n");
    }
}
