//! ONNX face-mesh backend.
//!
//! Runs a MediaPipe face-mesh landmark model (468 points, 192x192 input)
//! over the whole frame. The model has no blendshape head, so detections
//! carry no expression scores.

use super::{CoordinateSpace, DetectedFace, DetectorFactory, Landmark, LandmarkDetector};
use crate::landmarks::LandmarkModel;
use anyhow::{anyhow, bail, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::{debug, info};
use ndarray::{Array4, CowArray, IxDyn};
use ort::environment::Environment;
use ort::session::{Session, SessionBuilder};
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MODEL_INPUT_SIZE: u32 = 192;
const MESH_LANDMARKS: usize = 468;
pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.5;

/// Builds one `FaceMeshDetector` (with its own runtime session) per worker.
#[derive(Debug, Clone)]
pub struct FaceMeshFactory {
    model_path: PathBuf,
    presence_threshold: f32,
}

impl FaceMeshFactory {
    pub fn new(model_path: &Path) -> Self {
        Self {
            model_path: model_path.to_path_buf(),
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
        }
    }

    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }
}

impl DetectorFactory for FaceMeshFactory {
    type Detector = FaceMeshDetector;

    fn landmark_model(&self) -> LandmarkModel {
        LandmarkModel::FaceMesh
    }

    fn ensure_available(&self) -> Result<()> {
        if !self.model_path.is_file() {
            bail!(
                "face mesh model not found at {:?}; download it before running",
                self.model_path
            );
        }
        Ok(())
    }

    fn create(&self) -> Result<FaceMeshDetector> {
        self.ensure_available()?;
        let environment = Environment::builder()
            .with_name("mouthmap")
            .build()
            .map_err(|err| anyhow!("failed to initialize onnx runtime environment: {err}"))?;
        let environment = Arc::new(environment);
        let session = SessionBuilder::new(&environment)
            .map_err(|err| anyhow!("failed to create inference session: {err}"))?
            .with_model_from_file(&self.model_path)
            .map_err(|err| anyhow!("failed to load {:?}: {err}", self.model_path))?;

        let channels_first = session
            .inputs
            .first()
            .and_then(|input| input.dimensions.get(1).copied().flatten())
            == Some(3);
        info!(
            "Loaded face mesh model {:?} ({} layout)",
            self.model_path,
            if channels_first { "NCHW" } else { "NHWC" }
        );

        Ok(FaceMeshDetector {
            _environment: environment,
            session,
            channels_first,
            presence_threshold: self.presence_threshold,
        })
    }
}

pub struct FaceMeshDetector {
    _environment: Arc<Environment>,
    session: Session,
    channels_first: bool,
    presence_threshold: f32,
}

impl LandmarkDetector for FaceMeshDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>> {
        let input = self.prepare_input(image)?;
        let (points, presence) = self.run_model(&input)?;

        if presence < self.presence_threshold {
            debug!("Face presence {:.3} below threshold", presence);
            return Ok(Vec::new());
        }
        if points.len() < MESH_LANDMARKS * 3 {
            bail!(
                "face mesh output has {} values, expected {}",
                points.len(),
                MESH_LANDMARKS * 3
            );
        }

        let scale = MODEL_INPUT_SIZE as f32;
        let landmarks = points
            .chunks_exact(3)
            .take(MESH_LANDMARKS)
            .map(|p| Landmark::new(p[0] / scale, p[1] / scale, p[2] / scale))
            .collect();

        Ok(vec![DetectedFace {
            landmarks,
            space: CoordinateSpace::Normalized,
            blend_shapes: None,
        }])
    }
}

impl FaceMeshDetector {
    fn prepare_input(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let resized = imageops::resize(image, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::Triangle);
        let size = MODEL_INPUT_SIZE as usize;
        let shape = if self.channels_first {
            (1, 3, size, size)
        } else {
            (1, size, size, 3)
        };
        let mut tensor = Array4::<f32>::zeros(shape);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = pixel.0[c] as f32 / 255.0;
                if self.channels_first {
                    tensor[[0, c, y, x]] = value;
                } else {
                    tensor[[0, y, x, c]] = value;
                }
            }
        }
        Ok(tensor)
    }

    /// Returns the flattened landmark output and the face presence score.
    fn run_model(&self, input: &Array4<f32>) -> Result<(Vec<f32>, f32)> {
        let allocator = self.session.allocator();
        let input_dyn: CowArray<'_, f32, IxDyn> = CowArray::from(input.view().into_dyn());
        let value = Value::from_array(allocator, &input_dyn)
            .map_err(|err| anyhow!("failed to prepare model input: {err}"))?;
        let outputs = self
            .session
            .run(vec![value])
            .map_err(|err| anyhow!("model inference failed: {err}"))?;

        let mut points = None;
        let mut presence = None;
        for output in &outputs {
            let tensor = output
                .try_extract::<f32>()
                .map_err(|err| anyhow!("unexpected model output: {err}"))?;
            let data: Vec<f32> = tensor.view().iter().copied().collect();
            match data.len() {
                1 => presence = Some(presence_probability(data[0])),
                n if n >= MESH_LANDMARKS * 3 => points = Some(data),
                _ => {}
            }
        }

        let points = points.ok_or_else(|| anyhow!("model produced no landmark output"))?;
        // Models exported without the presence head are treated as always
        // seeing a face.
        Ok((points, presence.unwrap_or(1.0)))
    }
}

/// The face-mesh `faceflag` head outputs a raw logit.
fn presence_probability(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_logits_are_squashed() {
        assert_eq!(presence_probability(0.0), 0.5);
        assert!(presence_probability(-8.0) < 0.01);
        assert!(presence_probability(8.0) > 0.99);
    }

    #[test]
    fn small_positive_logit_counts_as_a_face() {
        // A logit of 0.3 is a probability of about 0.57.
        let probability = presence_probability(0.3);
        assert!(probability > DEFAULT_PRESENCE_THRESHOLD);
        assert!((probability - 0.574).abs() < 0.001);
    }

    #[test]
    fn presence_threshold_is_configurable() {
        let factory = FaceMeshFactory::new(Path::new("face_landmark.onnx"));
        assert_eq!(factory.presence_threshold, DEFAULT_PRESENCE_THRESHOLD);
        assert_eq!(factory.with_presence_threshold(0.8).presence_threshold, 0.8);
    }

    #[test]
    fn missing_model_fails_before_work_starts() {
        let factory = FaceMeshFactory::new(Path::new("/nonexistent/face_landmark.onnx"));
        assert!(factory.ensure_available().is_err());
    }
}
