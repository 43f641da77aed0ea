//! Landmark Extraction Module
//!
//! Turns one detected face into the per-frame feature bundle: the mouth
//! center, every lip point relative to that center, and (for the face-mesh
//! model) expression scores and the whole landmark set around the face
//! centroid.

use crate::dataset::SchemaVariant;
use crate::detector::{CoordinateSpace, DetectedFace, LandmarkDetector};
use anyhow::{bail, Result};
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;

/// Integer pixel coordinate, or a pixel offset.
pub type Point = [i32; 2];

const DLIB_OUTER_LIP: [usize; 12] = [48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59];
const DLIB_INNER_LIP: [usize; 8] = [60, 61, 62, 63, 64, 65, 66, 67];

// Upper lip corner to corner, then the lower lip back towards the start.
const MESH_OUTER_LIP: [usize; 18] = [
    61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291, 321, 405, 314, 17, 84, 181, 91,
];
const MESH_INNER_LIP: [usize; 18] = [
    78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308, 318, 402, 317, 14, 87, 178, 88,
];

pub const MOUTH_BLEND_SHAPES: [&str; 27] = [
    "jawForward",
    "jawLeft",
    "jawOpen",
    "jawRight",
    "mouthClose",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthFunnel",
    "mouthLeft",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthPucker",
    "mouthRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
];

pub const EYES_BLEND_SHAPES: [&str; 14] = [
    "eyeBlinkLeft",
    "eyeBlinkRight",
    "eyeLookDownLeft",
    "eyeLookDownRight",
    "eyeLookInLeft",
    "eyeLookInRight",
    "eyeLookOutLeft",
    "eyeLookOutRight",
    "eyeLookUpLeft",
    "eyeLookUpRight",
    "eyeSquintLeft",
    "eyeSquintRight",
    "eyeWideLeft",
    "eyeWideRight",
];

pub const BROW_BLEND_SHAPES: [&str; 5] = [
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
];

pub const FACE_SHAPE_BLEND_SHAPES: [&str; 5] = [
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "noseSneerLeft",
    "noseSneerRight",
];

/// Landmark layouts the extractor knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkModel {
    /// 68-point iBUG/dlib layout. Mouth geometry only.
    Dlib68,
    /// 468-point MediaPipe face mesh. Mouth geometry plus whole-face data.
    FaceMesh,
}

impl LandmarkModel {
    pub fn outer_lip_indices(self) -> &'static [usize] {
        match self {
            LandmarkModel::Dlib68 => &DLIB_OUTER_LIP,
            LandmarkModel::FaceMesh => &MESH_OUTER_LIP,
        }
    }

    pub fn inner_lip_indices(self) -> &'static [usize] {
        match self {
            LandmarkModel::Dlib68 => &DLIB_INNER_LIP,
            LandmarkModel::FaceMesh => &MESH_INNER_LIP,
        }
    }

    /// Smallest landmark count a detection must carry for this layout.
    pub fn landmark_count(self) -> usize {
        match self {
            LandmarkModel::Dlib68 => 68,
            LandmarkModel::FaceMesh => 468,
        }
    }

    pub fn schema(self) -> SchemaVariant {
        match self {
            LandmarkModel::Dlib68 => SchemaVariant::Minimal,
            LandmarkModel::FaceMesh => SchemaVariant::Extended,
        }
    }
}

/// Features extracted from a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameFeatures {
    pub mouth_center: Point,
    pub outer_lip_relative_points: Vec<Point>,
    pub inner_lip_relative_points: Vec<Point>,
    /// Present exactly when the frame was read with `LandmarkModel::FaceMesh`.
    #[serde(flatten)]
    pub face: Option<FaceFeatures>,
}

/// Whole-face data carried by the extended schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceFeatures {
    pub blend_shapes: BTreeMap<String, f32>,
    pub mouth_blend_shapes: BTreeMap<String, f32>,
    pub eyes_blend_shapes: BTreeMap<String, f32>,
    pub brow_blend_shapes: BTreeMap<String, f32>,
    pub face_shape_blend_shapes: BTreeMap<String, f32>,
    #[serde(rename = "3d_landmarks")]
    pub landmarks_3d: Vec<[f32; 3]>,
    pub pixel_landmarks: Vec<Point>,
    pub relative_landmarks: Vec<Point>,
    pub face_center_pixel: Point,
    pub face_center_3d: [f32; 3],
}

/// Runs the detector on a frame and extracts features from the first face.
///
/// Returns `Ok(None)` when no face is detected.
pub fn extract_features<D>(
    image: &RgbImage,
    detector: &mut D,
    model: LandmarkModel,
) -> Result<Option<FrameFeatures>>
where
    D: LandmarkDetector + ?Sized,
{
    let faces = detector.detect(image)?;
    let Some(face) = faces.into_iter().next() else {
        return Ok(None);
    };
    features_from_face(&face, image.width(), image.height(), model).map(Some)
}

/// Builds the feature bundle for one detected face in a `width` x `height`
/// frame.
pub fn features_from_face(
    face: &DetectedFace,
    width: u32,
    height: u32,
    model: LandmarkModel,
) -> Result<FrameFeatures> {
    if face.landmarks.len() < model.landmark_count() {
        bail!(
            "detector returned {} landmarks, {:?} needs {}",
            face.landmarks.len(),
            model,
            model.landmark_count()
        );
    }

    let (w, h) = (width as f32, height as f32);
    let pixel: Vec<Point> = face
        .landmarks
        .iter()
        .map(|lm| match face.space {
            CoordinateSpace::Pixel => [round(lm.x), round(lm.y)],
            CoordinateSpace::Normalized => [round(lm.x * w), round(lm.y * h)],
        })
        .collect();

    let outer: Vec<Point> = model.outer_lip_indices().iter().map(|&i| pixel[i]).collect();
    let inner: Vec<Point> = model.inner_lip_indices().iter().map(|&i| pixel[i]).collect();
    let mouth: Vec<Point> = outer.iter().chain(inner.iter()).copied().collect();
    let mouth_center = centroid(&mouth);

    let face_features = match model {
        LandmarkModel::Dlib68 => None,
        LandmarkModel::FaceMesh => {
            let landmarks_3d: Vec<[f32; 3]> = face
                .landmarks
                .iter()
                .map(|lm| match face.space {
                    CoordinateSpace::Normalized => [lm.x, lm.y, lm.z],
                    CoordinateSpace::Pixel => [lm.x / w, lm.y / h, lm.z / w],
                })
                .collect();
            let face_center_pixel = centroid(&pixel);
            let relative_landmarks = relative_to(&pixel, face_center_pixel);
            let blend_shapes = face.blend_shapes.clone().unwrap_or_default();

            Some(FaceFeatures {
                mouth_blend_shapes: project(&blend_shapes, &MOUTH_BLEND_SHAPES),
                eyes_blend_shapes: project(&blend_shapes, &EYES_BLEND_SHAPES),
                brow_blend_shapes: project(&blend_shapes, &BROW_BLEND_SHAPES),
                face_shape_blend_shapes: project(&blend_shapes, &FACE_SHAPE_BLEND_SHAPES),
                blend_shapes,
                face_center_3d: mean_3d(&landmarks_3d),
                landmarks_3d,
                pixel_landmarks: pixel,
                relative_landmarks,
                face_center_pixel,
            })
        }
    };

    Ok(FrameFeatures {
        mouth_center,
        outer_lip_relative_points: relative_to(&outer, mouth_center),
        inner_lip_relative_points: relative_to(&inner, mouth_center),
        face: face_features,
    })
}

fn round(value: f32) -> i32 {
    value.round() as i32
}

/// Mean of the points, rounded to the nearest pixel.
fn centroid(points: &[Point]) -> Point {
    if points.is_empty() {
        return [0, 0];
    }
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0i64, 0i64), |(sx, sy), p| {
        (sx + p[0] as i64, sy + p[1] as i64)
    });
    [(sx as f64 / n).round() as i32, (sy as f64 / n).round() as i32]
}

fn mean_3d(points: &[[f32; 3]]) -> [f32; 3] {
    if points.is_empty() {
        return [0.0; 3];
    }
    let n = points.len() as f64;
    let mut sum = [0f64; 3];
    for p in points {
        for (acc, v) in sum.iter_mut().zip(p) {
            *acc += *v as f64;
        }
    }
    sum.map(|s| (s / n) as f32)
}

fn relative_to(points: &[Point], center: Point) -> Vec<Point> {
    points
        .iter()
        .map(|p| [p[0] - center[0], p[1] - center[1]])
        .collect()
}

/// Picks the named scores out of `scores`; absent names read as 0.0.
fn project(scores: &BTreeMap<String, f32>, names: &[&str]) -> BTreeMap<String, f32> {
    names
        .iter()
        .map(|name| (name.to_string(), scores.get(*name).copied().unwrap_or(0.0)))
        .collect()
}
