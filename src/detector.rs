//! Detector Module
//!
//! The face-landmark detector is an external capability. The pipeline only
//! sees it through `LandmarkDetector`, and each worker owns its own instance
//! built by a `DetectorFactory`, since backends are not safe to share
//! between concurrent callers.

use crate::landmarks::LandmarkModel;
use anyhow::Result;
use image::RgbImage;
use std::collections::BTreeMap;

#[cfg(feature = "onnx")]
pub mod onnx;

/// Coordinate space a backend reports landmarks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSpace {
    /// Image pixels.
    Pixel,
    /// `x` and `y` in `[0, 1]` relative to image width and height; `z` on
    /// roughly the same scale as `x`.
    Normalized,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Landmarks for one detected face.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub landmarks: Vec<Landmark>,
    pub space: CoordinateSpace,
    /// Expression scores by category name, when the backend produces them.
    pub blend_shapes: Option<BTreeMap<String, f32>>,
}

pub trait LandmarkDetector {
    /// Detects faces in an RGB frame. An empty result means no face was
    /// found; faces are returned in the backend's own order.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>>;
}

/// Builds per-worker detector instances.
pub trait DetectorFactory: Sync {
    type Detector: LandmarkDetector;

    /// The landmark layout produced by detectors from this factory. This
    /// fixes the dataset schema for a run.
    fn landmark_model(&self) -> LandmarkModel;

    /// Checks that required resources (model files) exist. Called once
    /// before any work is dispatched.
    fn ensure_available(&self) -> Result<()>;

    fn create(&self) -> Result<Self::Detector>;
}
