//! Multi-strategy face detection with sequential fallback.
//!
//! Strategies run in a fixed order and the first one that produces a face
//! wins. A strategy that errors, times out or finds nothing is logged and the
//! next one is tried; only when all of them fail does the caller see
//! [`Error::NoFaceDetected`], carrying the full attempt log.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::detector::{
    face_selection_score, select_face, FaceBoxDetector, FaceCandidate, MeshDetector,
};
use crate::error::{Error, Result};
use crate::preprocess::{self, PreparedImage};
use crate::transform::Rotation;
use crate::types::{DetectionFrame, ImageSize, LandmarkSet, MESH_POINT_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Coarse box → padded crop → mesh on the crop.
    EnhancedTwoStep,
    /// Mesh on the full image.
    DirectMesh,
    /// Mesh on rescaled copies of the image.
    MultiResolution,
    /// Mesh on a contrast/brightness enhanced copy.
    Preprocessed,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::EnhancedTwoStep,
        Strategy::DirectMesh,
        Strategy::MultiResolution,
        Strategy::Preprocessed,
    ];

    /// Fixed prior used in the quality score.
    pub fn prior(&self) -> f32 {
        match self {
            Strategy::EnhancedTwoStep => 1.0,
            Strategy::DirectMesh => 0.9,
            Strategy::MultiResolution => 0.8,
            Strategy::Preprocessed => 0.7,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::EnhancedTwoStep => "enhanced_two_step",
            Strategy::DirectMesh => "direct_mesh",
            Strategy::MultiResolution => "multi_resolution",
            Strategy::Preprocessed => "preprocessed",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Detected(usize),
    Empty,
    Failed(String),
    TimedOut,
}

/// One strategy's try, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Successful detection.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// Faces in source-image coordinates, best candidate first.
    pub faces: Vec<LandmarkSet>,
    pub strategy: Strategy,
    /// Diagnostic score in [0, 1]; never used to pick a strategy.
    pub quality: f32,
    pub image_size: ImageSize,
    pub attempts: Vec<StrategyAttempt>,
}

impl DetectionOutcome {
    pub fn primary_face(&self) -> Option<&LandmarkSet> {
        self.faces.first()
    }

    pub fn into_frame(self, timestamp_ms: u64) -> DetectionFrame {
        DetectionFrame::new(timestamp_ms, self.faces, self.image_size)
    }
}

/// `0.4 * completeness + 0.3 * face area ratio + 0.3 * strategy prior`.
pub fn detection_quality(face: &LandmarkSet, image_size: ImageSize, strategy: Strategy) -> f32 {
    let completeness = (face.len() as f32 / MESH_POINT_COUNT as f32).min(1.0);
    let area = if image_size.is_empty() {
        0.0
    } else {
        (face.bounding_box.area() / image_size.area()).clamp(0.0, 1.0)
    };
    0.4 * completeness + 0.3 * area + 0.3 * strategy.prior()
}

pub struct DetectionOrchestrator {
    mesh: Arc<dyn MeshDetector>,
    boxes: Option<Arc<dyn FaceBoxDetector>>,
    config: DetectionConfig,
}

impl DetectionOrchestrator {
    pub fn new(mesh: Arc<dyn MeshDetector>, config: DetectionConfig) -> Self {
        Self {
            mesh,
            boxes: None,
            config,
        }
    }

    /// Enable the two-step strategy with a coarse face detector.
    pub fn with_face_detector(mut self, boxes: Arc<dyn FaceBoxDetector>) -> Self {
        self.boxes = Some(boxes);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Run the strategies in order until one finds a face.
    pub async fn detect(
        &self,
        image: &DynamicImage,
        rotation: Rotation,
    ) -> Result<DetectionOutcome> {
        let image_size = ImageSize::new(image.width(), image.height());
        let capped = preprocess::cap_size(image.clone(), self.config.max_image_dimension);
        if !capped.mapping.is_identity() {
            debug!(from = %image_size, to = %capped.size(), "downscaled oversized image");
        }

        let limit = Duration::from_millis(self.config.strategy_timeout_ms);
        let mut attempts = Vec::with_capacity(Strategy::ALL.len());

        for strategy in Strategy::ALL {
            let started = Instant::now();
            let result = tokio::time::timeout(limit, self.run(strategy, &capped, rotation)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(Ok(faces)) if !faces.is_empty() => {
                    let mut faces: Vec<LandmarkSet> =
                        faces.iter().map(|f| capped.mapping.to_source(f)).collect();
                    sort_by_selection(&mut faces, image_size);
                    let quality = faces
                        .first()
                        .map(|f| detection_quality(f, image_size, strategy))
                        .unwrap_or(0.0);
                    attempts.push(StrategyAttempt {
                        strategy,
                        outcome: AttemptOutcome::Detected(faces.len()),
                        elapsed_ms,
                    });
                    info!(%strategy, faces = faces.len(), quality, elapsed_ms, "face detected");
                    return Ok(DetectionOutcome {
                        faces,
                        strategy,
                        quality,
                        image_size,
                        attempts,
                    });
                }
                Ok(Ok(_)) => {
                    debug!(%strategy, elapsed_ms, "strategy found no face");
                    AttemptOutcome::Empty
                }
                Ok(Err(e)) => {
                    warn!(%strategy, error = %e, elapsed_ms, "strategy failed, falling back");
                    AttemptOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    warn!(
                        %strategy,
                        timeout_ms = self.config.strategy_timeout_ms,
                        "strategy timed out, falling back"
                    );
                    AttemptOutcome::TimedOut
                }
            };
            attempts.push(StrategyAttempt {
                strategy,
                outcome,
                elapsed_ms,
            });
        }

        warn!(
            attempts = attempts.len(),
            "no face detected by any strategy"
        );
        Err(Error::NoFaceDetected { attempts })
    }

    /// One strategy, returning faces in the coordinates of `image`.
    async fn run(
        &self,
        strategy: Strategy,
        image: &PreparedImage,
        rotation: Rotation,
    ) -> Result<Vec<LandmarkSet>> {
        let image = &image.image;
        match strategy {
            Strategy::EnhancedTwoStep => self.two_step(image, rotation).await,
            Strategy::DirectMesh => self.mesh.detect(image, rotation).await,
            Strategy::MultiResolution => self.multi_resolution(image, rotation).await,
            Strategy::Preprocessed => {
                let enhanced =
                    preprocess::enhance(image, self.config.contrast, self.config.brightness);
                self.mesh.detect(&enhanced, rotation).await
            }
        }
    }

    async fn two_step(&self, image: &DynamicImage, rotation: Rotation) -> Result<Vec<LandmarkSet>> {
        let Some(boxes) = &self.boxes else {
            return Err(Error::detector("two-step", "no coarse face detector configured"));
        };
        let size = ImageSize::new(image.width(), image.height());
        let candidates: Vec<FaceCandidate> = boxes.detect_faces(image).await?;
        let Some(face) = select_face(&candidates, size) else {
            return Ok(Vec::new());
        };
        debug!(
            candidates = candidates.len(),
            x = face.bbox.x,
            y = face.bbox.y,
            w = face.bbox.width,
            "selected face box"
        );

        let Some(crop) = preprocess::crop_face(
            image,
            &face.bbox,
            &self.config.padding,
            self.config.min_working_size,
        ) else {
            return Ok(Vec::new());
        };
        let faces = self.mesh.detect(&crop.image, rotation).await?;
        Ok(faces.iter().map(|f| crop.mapping.to_source(f)).collect())
    }

    async fn multi_resolution(
        &self,
        image: &DynamicImage,
        rotation: Rotation,
    ) -> Result<Vec<LandmarkSet>> {
        let mut last_error = None;
        let mut tried = 0;
        for &factor in &self.config.scales {
            let Some(scaled) = preprocess::rescale(image, factor) else {
                continue;
            };
            tried += 1;
            match self.mesh.detect(&scaled.image, rotation).await {
                Ok(faces) if !faces.is_empty() => {
                    debug!(factor, "multi-resolution hit");
                    return Ok(faces.iter().map(|f| scaled.mapping.to_source(f)).collect());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(factor, error = %e, "multi-resolution scale failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            // Every usable scale errored.
            Some(e) if tried > 0 && tried == self.config.scales.len() => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

fn sort_by_selection(faces: &mut [LandmarkSet], image_size: ImageSize) {
    faces.sort_by(|a, b| {
        let score = |f: &LandmarkSet| {
            face_selection_score(&FaceCandidate::new(f.bounding_box, 1.0), image_size)
        };
        score(b).total_cmp(&score(a))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::canonical_face;
    use crate::types::BoundingBox;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a script, one per call; an exhausted script finds nothing.
    struct ScriptedMesh {
        replies: Mutex<VecDeque<Result<Vec<LandmarkSet>>>>,
        sizes: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedMesh {
        fn new(replies: Vec<Result<Vec<LandmarkSet>>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                sizes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MeshDetector for ScriptedMesh {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn detect(
            &self,
            image: &DynamicImage,
            _rotation: Rotation,
        ) -> Result<Vec<LandmarkSet>> {
            self.sizes.lock().unwrap().push((image.width(), image.height()));
            self.replies.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    struct BrokenBoxes;

    #[async_trait]
    impl FaceBoxDetector for BrokenBoxes {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn detect_faces(&self, _image: &DynamicImage) -> Result<Vec<FaceCandidate>> {
            Err(Error::detector("broken", "model crashed"))
        }
    }

    struct OneBox(BoundingBox);

    #[async_trait]
    impl FaceBoxDetector for OneBox {
        fn name(&self) -> &'static str {
            "one"
        }

        async fn detect_faces(&self, _image: &DynamicImage) -> Result<Vec<FaceCandidate>> {
            Ok(vec![FaceCandidate::new(self.0, 0.9)])
        }
    }

    fn face() -> LandmarkSet {
        canonical_face(BoundingBox::new(200.0, 100.0, 240.0, 300.0))
    }

    fn image() -> DynamicImage {
        DynamicImage::new_luma8(640, 480)
    }

    #[tokio::test]
    async fn falls_back_when_two_step_throws() {
        let mesh = ScriptedMesh::new(vec![Ok(vec![face()])]);
        let orchestrator = DetectionOrchestrator::new(mesh, DetectionConfig::default())
            .with_face_detector(Arc::new(BrokenBoxes));

        let outcome = orchestrator.detect(&image(), Rotation::NONE).await.unwrap();
        assert_eq!(outcome.strategy, Strategy::DirectMesh);
        assert_eq!(outcome.faces.len(), 1);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(outcome.attempts[1].outcome, AttemptOutcome::Detected(1));
    }

    #[tokio::test]
    async fn two_step_maps_crop_back() {
        let bbox = BoundingBox::new(300.0, 200.0, 100.0, 100.0);
        // Face found at the crop origin, crop is 150x155 so no upscale at 128.
        let in_crop = canonical_face(BoundingBox::new(0.0, 0.0, 150.0, 155.0));
        let mesh = ScriptedMesh::new(vec![Ok(vec![in_crop])]);
        let config = DetectionConfig {
            min_working_size: 128,
            ..DetectionConfig::default()
        };
        let orchestrator = DetectionOrchestrator::new(mesh.clone(), config)
            .with_face_detector(Arc::new(OneBox(bbox)));

        let outcome = orchestrator.detect(&image(), Rotation::NONE).await.unwrap();
        assert_eq!(outcome.strategy, Strategy::EnhancedTwoStep);
        let b = outcome.primary_face().unwrap().bounding_box;
        assert!((b.x - 275.0).abs() < 1e-3 && (b.y - 160.0).abs() < 1e-3);
        assert_eq!(mesh.sizes.lock().unwrap()[0], (150, 155));
    }

    #[tokio::test]
    async fn multi_resolution_maps_scale_back() {
        // Direct: nothing. Scale 1.0: nothing. Scale 0.8: a face.
        let scaled_face = canonical_face(BoundingBox::new(80.0, 40.0, 160.0, 200.0));
        let mesh = ScriptedMesh::new(vec![Ok(vec![]), Ok(vec![]), Ok(vec![scaled_face])]);
        let orchestrator = DetectionOrchestrator::new(mesh.clone(), DetectionConfig::default());

        let outcome = orchestrator.detect(&image(), Rotation::NONE).await.unwrap();
        assert_eq!(outcome.strategy, Strategy::MultiResolution);
        let b = outcome.primary_face().unwrap().bounding_box;
        assert!((b.x - 100.0).abs() < 1e-3);
        assert!((b.width - 200.0).abs() < 1e-3);
        assert_eq!(mesh.sizes.lock().unwrap()[2], (512, 384));
        // No coarse detector: two-step is recorded as a failure.
        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn exhausted_strategies_report_attempts() {
        let mesh = ScriptedMesh::new(vec![Err(Error::detector("scripted", "boom"))]);
        let orchestrator = DetectionOrchestrator::new(mesh, DetectionConfig::default())
            .with_face_detector(Arc::new(BrokenBoxes));

        match orchestrator.detect(&image(), Rotation::NONE).await {
            Err(Error::NoFaceDetected { attempts }) => {
                assert_eq!(attempts.len(), 4);
                let order: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
                assert_eq!(order, Strategy::ALL.to_vec());
                assert!(matches!(attempts[1].outcome, AttemptOutcome::Failed(_)));
                assert_eq!(attempts[3].outcome, AttemptOutcome::Empty);
            }
            other => panic!(
                "expected NoFaceDetected, got {:?}",
                other.map(|o| o.strategy)
            ),
        }
    }

    #[tokio::test]
    async fn preprocessed_strategy_is_last_resort() {
        // Direct: nothing. Single scale: nothing. Enhanced image: a face.
        let mesh = ScriptedMesh::new(vec![Ok(vec![]), Ok(vec![]), Ok(vec![face()])]);
        let config = DetectionConfig {
            scales: vec![1.0],
            ..DetectionConfig::default()
        };
        let orchestrator = DetectionOrchestrator::new(mesh.clone(), config)
            .with_face_detector(Arc::new(BrokenBoxes));

        let outcome = orchestrator.detect(&image(), Rotation::NONE).await.unwrap();
        assert_eq!(outcome.strategy, Strategy::Preprocessed);
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(outcome.attempts[2].outcome, AttemptOutcome::Empty);
        assert_eq!(outcome.attempts[3].outcome, AttemptOutcome::Detected(1));
        // Enhancement keeps the pixel grid.
        assert_eq!(mesh.sizes.lock().unwrap()[2], (640, 480));

        // 0.4 * complete + 0.3 * (240 * 300) / (640 * 480) + 0.3 * 0.7.
        let expected = 0.4 + 0.3 * (72_000.0 / 307_200.0) + 0.3 * 0.7;
        assert!((outcome.quality - expected).abs() < 1e-5);
        assert_eq!(Strategy::Preprocessed.prior(), 0.7);
    }

    struct SlowMesh;

    #[async_trait]
    impl MeshDetector for SlowMesh {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn detect(
            &self,
            _image: &DynamicImage,
            _rotation: Rotation,
        ) -> Result<Vec<LandmarkSet>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(vec![canonical_face(BoundingBox::new(0.0, 0.0, 100.0, 100.0))])
        }
    }

    #[tokio::test]
    async fn slow_strategies_time_out() {
        let config = DetectionConfig {
            strategy_timeout_ms: 20,
            ..DetectionConfig::default()
        };
        let orchestrator = DetectionOrchestrator::new(Arc::new(SlowMesh), config);
        match orchestrator.detect(&image(), Rotation::NONE).await {
            Err(Error::NoFaceDetected { attempts }) => {
                assert!(attempts[1..].iter().all(|a| a.outcome == AttemptOutcome::TimedOut));
            }
            _ => panic!("expected every strategy to time out"),
        }
    }

    #[tokio::test]
    async fn oversized_images_are_capped() {
        let big = DynamicImage::new_luma8(3840, 2160);
        let capped_face = canonical_face(BoundingBox::new(480.0, 270.0, 480.0, 540.0));
        let mesh = ScriptedMesh::new(vec![Ok(vec![capped_face])]);
        let orchestrator = DetectionOrchestrator::new(mesh.clone(), DetectionConfig::default());

        let outcome = orchestrator.detect(&big, Rotation::NONE).await.unwrap();
        assert_eq!(mesh.sizes.lock().unwrap()[0], (1920, 1080));
        assert_eq!(outcome.image_size, ImageSize::new(3840, 2160));
        let b = outcome.primary_face().unwrap().bounding_box;
        assert!((b.x - 960.0).abs() < 1e-2 && (b.width - 960.0).abs() < 1e-2);
    }

    #[test]
    fn quality_blends_terms() {
        let set = canonical_face(BoundingBox::new(0.0, 0.0, 320.0, 240.0));
        let q = detection_quality(&set, ImageSize::new(640, 480), Strategy::EnhancedTwoStep);
        assert!((q - (0.4 + 0.3 * 0.25 + 0.3)).abs() < 1e-5);
        let q = detection_quality(&set, ImageSize::new(640, 480), Strategy::Preprocessed);
        assert!((q - (0.4 + 0.3 * 0.25 + 0.21)).abs() < 1e-5);
    }
}
