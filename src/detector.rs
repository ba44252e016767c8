//! Detector contracts and the bundled coarse face detector.
//!
//! Mesh inference is an external collaborator: anything that turns an image
//! into 468-point [`LandmarkSet`]s implements [`MeshDetector`]. Coarse face
//! boxes come from a [`FaceBoxDetector`]; [`SeetaFaceDetector`] implements one
//! with the SeetaFace frontal cascade from `rustface`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::mesh::canonical_face;
use crate::transform::Rotation;
use crate::types::{BoundingBox, ImageSize, LandmarkSet, Point};

/// Fine-grained face-mesh detector.
#[async_trait]
pub trait MeshDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Zero or more landmark sets for `image`, in its pixel coordinates.
    async fn detect(&self, image: &DynamicImage, rotation: Rotation) -> Result<Vec<LandmarkSet>>;
}

/// Coarse face bounding-box detector.
#[async_trait]
pub trait FaceBoxDetector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceCandidate>>;
}

/// A coarse face box with the detector's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl FaceCandidate {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// `0.7 * area + 0.3 * (1 - distance)`, with area relative to the image and
/// centre distance relative to half the image diagonal.
pub fn face_selection_score(candidate: &FaceCandidate, image_size: ImageSize) -> f32 {
    if image_size.is_empty() {
        return 0.0;
    }
    let area = (candidate.bbox.area() / image_size.area()).clamp(0.0, 1.0);
    let center = Point::new(
        image_size.width as f32 / 2.0,
        image_size.height as f32 / 2.0,
    );
    let half_diagonal = center.distance(&Point::zero());
    let distance = (candidate.bbox.center().distance(&center) / half_diagonal).clamp(0.0, 1.0);
    0.7 * area + 0.3 * (1.0 - distance)
}

/// The best-scoring candidate, if any.
pub fn select_face(candidates: &[FaceCandidate], image_size: ImageSize) -> Option<FaceCandidate> {
    candidates
        .iter()
        .map(|c| (face_selection_score(c, image_size), c))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| *c)
}

fn image_size_of(image: &DynamicImage) -> ImageSize {
    ImageSize::new(image.width(), image.height())
}

/// SeetaFace frontal detector (via `rustface`).
///
/// The model is parsed once and shared. Each detection builds a detector from
/// a copy of it on a blocking thread, since the rustface detector is neither
/// `Send` nor cheap to run.
#[derive(Clone)]
pub struct SeetaFaceDetector {
    model: Arc<rustface::Model>,
    min_face_size: u32,
    score_threshold: f64,
}

impl std::fmt::Debug for SeetaFaceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeetaFaceDetector")
            .field("min_face_size", &self.min_face_size)
            .field("score_threshold", &self.score_threshold)
            .finish()
    }
}

impl SeetaFaceDetector {
    /// Load a `seeta_fd_frontal_v1.0.bin` model file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Parse an in-memory model.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let model = rustface::read_model(std::io::Cursor::new(bytes.as_slice()))
            .map_err(|e| Error::Model(e.to_string()))?;
        Ok(Self {
            model: Arc::new(model),
            min_face_size: 20,
            score_threshold: 2.0,
        })
    }

    pub fn with_min_face_size(mut self, size: u32) -> Self {
        self.min_face_size = size.max(20);
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Run the cascade on a grayscale image.
    pub fn detect_gray(&self, gray: &GrayImage) -> Vec<FaceCandidate> {
        let model = rustface::Model::clone(&self.model);
        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_threshold);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let (width, height) = gray.dimensions();
        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceCandidate::new(
                    BoundingBox::new(
                        bbox.x() as f32,
                        bbox.y() as f32,
                        bbox.width() as f32,
                        bbox.height() as f32,
                    ),
                    face.score() as f32,
                )
            })
            .collect()
    }
}

#[async_trait]
impl FaceBoxDetector for SeetaFaceDetector {
    fn name(&self) -> &'static str {
        "seetaface"
    }

    async fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceCandidate>> {
        let gray = image.to_luma8();
        let this = self.clone();
        let faces = tokio::task::spawn_blocking(move || this.detect_gray(&gray))
            .await
            .map_err(|e| Error::detector("seetaface", e.to_string()))?;
        debug!(faces = faces.len(), size = %image_size_of(image), "seetaface detection finished");
        Ok(faces)
    }
}

/// Mesh detector that fits the canonical face into coarse face boxes.
///
/// Gives the pipeline a self-contained landmark source when no learned mesh
/// model is attached. The coarse box covers brows to mouth, so it is grown to
/// reach the forehead and chin before the template is placed.
pub struct TemplateMeshDetector<D> {
    boxes: D,
}

impl<D: FaceBoxDetector> TemplateMeshDetector<D> {
    pub fn new(boxes: D) -> Self {
        Self { boxes }
    }

    fn face_rect(bbox: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            bbox.x - 0.1 * bbox.width,
            bbox.y - 0.35 * bbox.height,
            bbox.width * 1.2,
            bbox.height * 1.5,
        )
    }
}

#[async_trait]
impl<D: FaceBoxDetector> MeshDetector for TemplateMeshDetector<D> {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn detect(&self, image: &DynamicImage, rotation: Rotation) -> Result<Vec<LandmarkSet>> {
        if !rotation.is_none() {
            debug!(
                degrees = rotation.as_degrees(),
                "template mesh ignores rotation hint"
            );
        }
        let size = image_size_of(image);
        let mut candidates = self.boxes.detect_faces(image).await?;
        candidates.sort_by(|a, b| {
            face_selection_score(b, size).total_cmp(&face_selection_score(a, size))
        });
        Ok(candidates
            .iter()
            .map(|c| canonical_face(Self::face_rect(&c.bbox)))
            .collect())
    }
}
