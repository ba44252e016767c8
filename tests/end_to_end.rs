//! End-to-end checks through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use palace_face::orchestrator::AttemptOutcome;
use palace_face::preview::DropReason;
use palace_face::{
    analyze_face, canonical_face, BoundingBox, DetectionConfig, DetectionOrchestrator, Error,
    FaceBoxDetector, FaceCandidate, FitMode, ImageSize, LandmarkSet, LandmarkStabilizer,
    MeshDetector, MirrorState, OverlayFrame, PalaceAnalyzer, PalaceTable, PipelineConfig, Point,
    PreviewFrame, PreviewResult, PreviewSession, Result, Rotation, Strategy, ViewSetup,
    ViewTransform,
};

/// Finds the canonical face in the middle of every image it sees.
struct CentredMesh {
    delay: Duration,
    calls: AtomicUsize,
}

impl CentredMesh {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MeshDetector for CentredMesh {
    fn name(&self) -> &'static str {
        "centred"
    }

    async fn detect(&self, image: &DynamicImage, _rotation: Rotation) -> Result<Vec<LandmarkSet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![canonical_face(BoundingBox::new(w * 0.3, h * 0.2, w * 0.4, h * 0.6))])
    }
}

struct CrashingBoxes;

#[async_trait]
impl FaceBoxDetector for CrashingBoxes {
    fn name(&self) -> &'static str {
        "crashing"
    }

    async fn detect_faces(&self, _image: &DynamicImage) -> Result<Vec<FaceCandidate>> {
        Err(Error::detector("crashing", "inference backend unavailable"))
    }
}

#[test]
fn symmetric_face_reads_symmetrically() {
    let face = canonical_face(BoundingBox::new(120.0, 80.0, 360.0, 460.0));
    let reading = analyze_face(&face, &PalaceAnalyzer::default());
    assert_eq!(reading.palaces.len(), 12);

    let mut compared = 0;
    for palace in &reading.palaces {
        assert!(palace.is_located(), "{} not located", palace.name);
        for (name, &left) in &palace.features {
            let Some(feature) = name.strip_prefix("left_") else {
                continue;
            };
            let right = palace.features[&format!("right_{}", feature)];
            // 1% relative, with an absolute floor for values near zero.
            let tolerance = 0.01 * left.abs().max(right.abs()) + 1e-3;
            assert!(
                (left - right).abs() <= tolerance,
                "{}: left_{} = {} vs right_{} = {}",
                palace.name,
                feature,
                left,
                feature,
                right
            );
            compared += 1;
        }
    }
    assert!(compared >= 10);
}

#[test]
fn crop_800x600_into_400x400() {
    let t = ViewTransform::new(
        ImageSize::new(800, 600),
        ImageSize::new(400, 400),
        FitMode::Crop,
        false,
        Rotation::NONE,
    );
    // Height is the dominant axis: scale = 400 / 600.
    assert!((t.scale_x - 0.666_667).abs() < 1e-5);
    assert!((t.scale_y - 0.666_667).abs() < 1e-5);
    // Displayed width 533.33, half the 133.33 overflow clipped on each side.
    assert!((t.displayed_size().0 - 533.333).abs() < 1e-2);
    assert!((t.offset_x - -66.667).abs() < 1e-2);
    assert_eq!(t.offset_y, 0.0);

    let centre = t.image_to_view(Point::new(400.0, 300.0));
    assert!((centre.x - 200.0).abs() < 1e-3 && (centre.y - 200.0).abs() < 1e-3);
    let back = t.view_to_image(centre);
    assert!((back.x - 400.0).abs() < 1e-3 && (back.y - 300.0).abs() < 1e-3);
}

#[tokio::test]
async fn detector_crash_falls_back_to_direct_mesh() {
    let mesh = CentredMesh::new(Duration::ZERO);
    let orchestrator = DetectionOrchestrator::new(mesh.clone(), DetectionConfig::default())
        .with_face_detector(Arc::new(CrashingBoxes));

    let image = DynamicImage::new_rgb8(640, 480);
    let outcome = orchestrator.detect(&image, Rotation::NONE).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::DirectMesh);
    assert_eq!(mesh.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        outcome.attempts[0].outcome,
        AttemptOutcome::Failed(ref m) if m.contains("unavailable")
    ));
    assert!(outcome.quality > 0.0 && outcome.quality <= 1.0);
}

#[tokio::test]
async fn detection_to_overlay_pipeline() {
    let mesh = CentredMesh::new(Duration::ZERO);
    let orchestrator = DetectionOrchestrator::new(mesh, DetectionConfig::default());
    let image = DynamicImage::new_rgb8(1280, 720);
    let outcome = orchestrator.detect(&image, Rotation::NONE).await.unwrap();
    let frame = outcome.into_frame(0);

    let mut stabilizer = LandmarkStabilizer::default();
    let stabilized = stabilizer.stabilize_frame(&frame).unwrap();
    assert_eq!(stabilized.landmarks.len(), 468);

    let reading = analyze_face(&stabilized.landmarks, &PalaceAnalyzer::default());
    assert!(reading.proportions.is_some());
    assert_eq!(reading.prompt_fields().len(), 14);

    let setup = ViewSetup {
        image_size: frame.image_size,
        view_size: ImageSize::new(390, 844),
        fit: FitMode::Crop,
        mirror: MirrorState::SensorMirrored,
        rotation: Rotation::NONE,
    };
    let overlay = OverlayFrame::build(&stabilized.landmarks, &setup, &PalaceTable::standard());
    assert!(overlay.transform.mirror);
    assert_eq!(overlay.palaces.len(), 12);
    assert_eq!(overlay.guide_lines.len(), 10);
}

fn counted_frame(timestamp_ms: u64, released: &Arc<AtomicUsize>) -> PreviewFrame {
    let released = Arc::clone(released);
    PreviewFrame::new(
        DynamicImage::new_rgb8(320, 240),
        Rotation::NONE,
        timestamp_ms,
    )
    .with_release(move || {
        released.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn preview_drops_frames_while_busy_and_releases_all() {
    let mesh = CentredMesh::new(Duration::from_millis(150));
    let session = PreviewSession::new(mesh.clone(), &PipelineConfig::default());
    let released = Arc::new(AtomicUsize::new(0));

    let busy = session.clone();
    let first = counted_frame(0, &released);
    let in_flight = tokio::spawn(async move { busy.submit(first).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Detection still running: dropped without calling the detector.
    let result = session.submit(counted_frame(30, &released)).await;
    assert_eq!(result, PreviewResult::Dropped(DropReason::InFlight));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let result = in_flight.await.unwrap();
    assert!(matches!(result, PreviewResult::Tracked(_)));
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(mesh.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.history_len().await, 1);
    assert_eq!(session.gate().dropped(), 1);
}

#[tokio::test]
async fn preview_throttles_fast_frames() {
    let mesh = CentredMesh::new(Duration::ZERO);
    let mut config = PipelineConfig::default();
    config.preview.min_frame_interval_ms = 200;
    let session = PreviewSession::new(mesh.clone(), &config);
    let released = Arc::new(AtomicUsize::new(0));

    let first = session.submit(counted_frame(0, &released)).await;
    assert!(matches!(first, PreviewResult::Tracked(_)));
    assert_eq!(
        session.submit(counted_frame(10, &released)).await,
        PreviewResult::Dropped(DropReason::Throttled)
    );
    tokio::time::sleep(Duration::from_millis(250)).await;
    let later = session.submit(counted_frame(260, &released)).await;
    assert!(matches!(later, PreviewResult::Tracked(_)));

    assert_eq!(released.load(Ordering::SeqCst), 3);
    assert_eq!(mesh.calls.load(Ordering::SeqCst), 2);
    assert!(session.is_temporally_stable().await);
}

#[tokio::test]
async fn clear_discards_late_results() {
    let mesh = CentredMesh::new(Duration::from_millis(100));
    let session = PreviewSession::new(mesh, &PipelineConfig::default());
    let released = Arc::new(AtomicUsize::new(0));

    let late = session.clone();
    let frame = counted_frame(0, &released);
    let pending = tokio::spawn(async move { late.submit(frame).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.clear().await;

    assert_eq!(pending.await.unwrap(), PreviewResult::Stale);
    assert_eq!(session.history_len().await, 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
