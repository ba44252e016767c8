//! View-space annotations for an external drawing layer.

use serde::{Deserialize, Serialize};

use crate::palace::{PalaceKind, PalaceTable};
use crate::proportions::{analyze_five_eyes, analyze_three_courts};
use crate::transform::{FitMode, MirrorState, Rotation, ViewTransform};
use crate::types::{BoundingBox, ImageSize, LandmarkSet, Point};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayPoint {
    pub index: usize,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PalaceMarker {
    pub palace: PalaceKind,
    pub position: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideKind {
    /// Horizontal three-court boundary.
    Court,
    /// Vertical five-eye boundary.
    Eye,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuideLine {
    pub kind: GuideKind,
    pub start: Point,
    pub end: Point,
    /// The line's position comes from the estimated upper court. Only the
    /// virtual forehead line is; eye lines are placed at measured landmarks.
    pub estimated: bool,
}

/// Everything a renderer needs for one frame, in view pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayFrame {
    pub transform: ViewTransform,
    pub face_box: BoundingBox,
    pub landmarks: Vec<OverlayPoint>,
    pub palaces: Vec<PalaceMarker>,
    pub guide_lines: Vec<GuideLine>,
}

/// How the source image is shown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSetup {
    pub image_size: ImageSize,
    pub view_size: ImageSize,
    pub fit: FitMode,
    pub mirror: MirrorState,
    pub rotation: Rotation,
}

impl ViewSetup {
    pub fn transform(&self) -> ViewTransform {
        ViewTransform::new(
            self.image_size,
            self.view_size,
            self.fit,
            self.mirror.display_flip(),
            self.rotation,
        )
    }
}

impl OverlayFrame {
    /// Project a face into view space. Guide lines are present only when the
    /// proportions could be computed.
    pub fn build(set: &LandmarkSet, setup: &ViewSetup, table: &PalaceTable) -> Self {
        let transform = setup.transform();
        let project = |p: Point| transform.image_to_view(p);

        let landmarks = set
            .landmarks
            .iter()
            .map(|l| OverlayPoint {
                index: l.index,
                position: project(l.point()),
            })
            .collect();

        let palaces = table
            .centroids(set)
            .into_iter()
            .map(|(palace, p)| PalaceMarker {
                palace,
                position: project(p),
            })
            .collect();

        let mut guide_lines = Vec::new();
        let face = set.bounding_box;
        let courts = analyze_three_courts(set);
        let eyes = analyze_five_eyes(set);
        if let (Some(courts), Some(eyes)) = (&courts, &eyes) {
            let xs = eyes.guide_lines_x;
            let (left, right) = (xs[0].min(xs[5]), xs[0].max(xs[5]));
            for (i, &y) in courts.guide_lines_y.iter().enumerate() {
                guide_lines.push(GuideLine {
                    kind: GuideKind::Court,
                    start: project(Point::new(left, y)),
                    end: project(Point::new(right, y)),
                    estimated: i == 0,
                });
            }
            let (top, bottom) = (courts.guide_lines_y[0], courts.guide_lines_y[3]);
            for &x in &xs {
                guide_lines.push(GuideLine {
                    kind: GuideKind::Eye,
                    start: project(Point::new(x, top)),
                    end: project(Point::new(x, bottom)),
                    estimated: false,
                });
            }
        }

        Self {
            face_box: transform.map_rect(&face),
            transform,
            landmarks,
            palaces,
            guide_lines,
        }
    }
}
