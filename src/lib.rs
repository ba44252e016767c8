//! # palace-face
//!
//! Physiognomy readings from 468-point face meshes.
//!
//! This crate provides:
//! - **Palace analysis**: the twelve palaces of face reading mapped to mesh
//!   landmark groups, with ratio and depth-fullness features per palace
//! - **Proportions**: three courts (vertical thirds) and five eyes (horizontal fifths)
//! - **Coordinate transforms**: image pixels to on-screen pixels under crop/fit,
//!   rotation and mirroring, with an inverse
//! - **Stabilization**: per-landmark smoothing and outlier rejection across frames
//! - **Detection orchestration**: sequential fallback over four detection
//!   strategies around pluggable async detectors
//! - **Live preview**: back-pressured frame admission and session history
//!
//! Mesh inference itself is external: plug a model in by implementing
//! [`MeshDetector`]. [`SeetaFaceDetector`] provides coarse face boxes.
//!
//! ## Pipeline Overview
//!
//! 1. Detect faces with [`DetectionOrchestrator`] (two-step crop, direct,
//!    multi-resolution, enhanced), first success wins
//! 2. Optionally smooth landmarks with a per-session [`LandmarkStabilizer`]
//! 3. Analyse the landmark set: [`analyze_face`] gives palace readings and proportions
//! 4. Project landmarks, palace centroids and guide lines into the view with
//!    [`OverlayFrame`]
//! 5. Hand [`FaceReading::prompt_fields`] to a text generator
//!
//! ## Quick Start
//!
//! ```rust
//! use palace_face::{analyze_face, canonical_face, BoundingBox, PalaceAnalyzer};
//!
//! // A synthetic, perfectly symmetric face filling a 240x300 box
//! let face = canonical_face(BoundingBox::new(100.0, 50.0, 240.0, 300.0));
//!
//! let reading = analyze_face(&face, &PalaceAnalyzer::default());
//! assert_eq!(reading.palaces.len(), 12);
//!
//! for (palace, text) in reading.prompt_fields() {
//!     println!("{}: {}", palace, text);
//! }
//! ```
//!
//! ## Mapping to the Screen
//!
//! ```rust
//! use palace_face::{FitMode, ImageSize, Point, Rotation, ViewTransform};
//!
//! let t = ViewTransform::new(
//!     ImageSize::new(800, 600),
//!     ImageSize::new(400, 400),
//!     FitMode::Crop,
//!     false,
//!     Rotation::NONE,
//! );
//! let p = t.image_to_view(Point::new(400.0, 300.0));
//! assert!((p.x - 200.0).abs() < 1e-3 && (p.y - 200.0).abs() < 1e-3);
//! ```

pub mod analysis;
pub mod config;
pub mod detector;
mod error;
pub mod mesh;
pub mod metrics;
pub mod orchestrator;
pub mod overlay;
pub mod palace;
pub mod preprocess;
pub mod preview;
pub mod proportions;
pub mod report;
pub mod stabilizer;
pub mod transform;
mod types;

pub use analysis::{PalaceAnalysisResult, PalaceAnalyzer};
pub use config::{CropPadding, DetectionConfig, PipelineConfig, PreviewConfig, StabilizerConfig};
pub use detector::{
    select_face, FaceBoxDetector, FaceCandidate, MeshDetector, SeetaFaceDetector,
    TemplateMeshDetector,
};
pub use error::{Error, Result};
pub use mesh::canonical_face;
pub use orchestrator::{
    AttemptOutcome, DetectionOrchestrator, DetectionOutcome, Strategy, StrategyAttempt,
};
pub use overlay::{OverlayFrame, ViewSetup};
pub use palace::{PalaceKind, PalaceRegion, PalaceTable, STANDARD_PALACES};
pub use preview::{
    DropReason, FrameGate, FrameHistory, FramePermit, PreviewFrame, PreviewResult, PreviewSession,
};
pub use proportions::{FiveEyeResult, ThreeCourtFiveEyeResult, ThreeCourtResult};
pub use report::{analyze_face, FaceReading};
pub use stabilizer::{LandmarkStabilizer, StabilityQuality, StabilizedFrame, StabilizedPoint};
pub use transform::{FitMode, MirrorState, Rotation, ViewTransform};
pub use types::{
    BoundingBox, DetectionFrame, ImageSize, Landmark, LandmarkSet, Point, MESH_POINT_COUNT,
};
