//! Image-space to view-space coordinate mapping.
//!
//! A point goes through rotate → scale → translate → (optional) mirror:
//!
//! ```text
//! r      = R(θ)·p + shift          (shift moves the rotated image to start at 0,0)
//! view   = offset + r * scale
//! view.x = view_width - view.x     (display mirroring only)
//! ```
//!
//! [`MirrorState`] is the single record of whether a capture still needs a
//! display-time flip or has already been flipped in its pixels.

use std::str::FromStr;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{BoundingBox, ImageSize, LandmarkSet, Point};

/// Content-fit policy of the destination view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the view, clipping the overflowing axis.
    #[default]
    Crop,
    /// Fit entirely inside the view, letterboxing as needed.
    Fit,
}

impl FromStr for FitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crop" => Ok(FitMode::Crop),
            "fit" => Ok(FitMode::Fit),
            other => Err(Error::InvalidConfig(format!("unknown fit mode '{}'", other))),
        }
    }
}

/// Clockwise rotation in degrees, normalized to [0, 360).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation(f32);

impl Rotation {
    pub const NONE: Rotation = Rotation(0.0);

    pub fn degrees(degrees: f32) -> Self {
        let d = degrees.rem_euclid(360.0);
        Rotation(if d.is_finite() { d } else { 0.0 })
    }

    pub fn as_degrees(&self) -> f32 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0.0
    }

    fn sin_cos(&self) -> (f32, f32) {
        // Exact values for the quarter turns cameras actually report.
        match self.0 {
            d if d == 0.0 => (0.0, 1.0),
            d if d == 90.0 => (1.0, 0.0),
            d if d == 180.0 => (0.0, -1.0),
            d if d == 270.0 => (-1.0, 0.0),
            d => d.to_radians().sin_cos(),
        }
    }

    fn rotate(&self, p: Point) -> Point {
        let (s, c) = self.sin_cos();
        Point::new(c * p.x - s * p.y, s * p.x + c * p.y)
    }

    fn unrotate(&self, p: Point) -> Point {
        let (s, c) = self.sin_cos();
        Point::new(c * p.x + s * p.y, -s * p.x + c * p.y)
    }
}

/// Mapping from source-image pixels to destination-view pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub mirror: bool,
    pub rotation: Rotation,
    pub image_size: ImageSize,
    pub view_size: ImageSize,
    /// False when the inputs were degenerate and this is the neutral transform.
    pub valid: bool,
    /// Translation applied after rotation so rotated content starts at (0,0).
    rotation_shift: Point,
}

impl ViewTransform {
    pub fn new(
        image_size: ImageSize,
        view_size: ImageSize,
        mode: FitMode,
        mirror: bool,
        rotation: Rotation,
    ) -> Self {
        if image_size.is_empty() || view_size.is_empty() {
            return Self::neutral(image_size, view_size);
        }

        // Bounds of the rotated image.
        let (w, h) = (image_size.width as f32, image_size.height as f32);
        let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .map(|(x, y)| rotation.rotate(Point::new(x, y)));
        let Some(bounds) = BoundingBox::enclosing(&corners) else {
            return Self::neutral(image_size, view_size);
        };
        let (src_w, src_h) = (bounds.width, bounds.height);
        if src_w <= 0.0 || src_h <= 0.0 {
            return Self::neutral(image_size, view_size);
        }

        let (view_w, view_h) = (view_size.width as f32, view_size.height as f32);
        let (scale, offset_x, offset_y) = match mode {
            FitMode::Crop => {
                if src_w / src_h > view_w / view_h {
                    let scale = view_h / src_h;
                    (scale, (view_w - src_w * scale) / 2.0, 0.0)
                } else {
                    let scale = view_w / src_w;
                    (scale, 0.0, (view_h - src_h * scale) / 2.0)
                }
            }
            FitMode::Fit => {
                let scale = (view_w / src_w).min(view_h / src_h);
                (
                    scale,
                    (view_w - src_w * scale) / 2.0,
                    (view_h - src_h * scale) / 2.0,
                )
            }
        };

        Self {
            scale_x: scale,
            scale_y: scale,
            offset_x,
            offset_y,
            mirror,
            rotation,
            image_size,
            view_size,
            valid: true,
            rotation_shift: Point::new(-bounds.x, -bounds.y),
        }
    }

    /// Identity-like transform (scale 1, offset 0) flagged invalid.
    pub fn neutral(image_size: ImageSize, view_size: ImageSize) -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            mirror: false,
            rotation: Rotation::NONE,
            image_size,
            view_size,
            valid: false,
            rotation_shift: Point::zero(),
        }
    }

    /// Size of the scaled content in view pixels.
    pub fn displayed_size(&self) -> (f32, f32) {
        let corners = [
            (0.0, 0.0),
            (self.image_size.width as f32, 0.0),
            (0.0, self.image_size.height as f32),
            (self.image_size.width as f32, self.image_size.height as f32),
        ]
        .map(|(x, y)| self.rotation.rotate(Point::new(x, y)));
        match BoundingBox::enclosing(&corners) {
            Some(b) => (b.width * self.scale_x, b.height * self.scale_y),
            None => (0.0, 0.0),
        }
    }

    pub fn image_to_view(&self, p: Point) -> Point {
        let r = self.rotation.rotate(p) + self.rotation_shift;
        let x = self.offset_x + r.x * self.scale_x;
        let y = self.offset_y + r.y * self.scale_y;
        if self.mirror {
            Point::new(self.view_size.width as f32 - x, y)
        } else {
            Point::new(x, y)
        }
    }

    pub fn view_to_image(&self, p: Point) -> Point {
        let x = if self.mirror {
            self.view_size.width as f32 - p.x
        } else {
            p.x
        };
        let r = Point::new(
            (x - self.offset_x) / self.scale_x,
            (p.y - self.offset_y) / self.scale_y,
        );
        self.rotation.unrotate(r - self.rotation_shift)
    }

    /// Box in view space enclosing the transformed corners of `rect`.
    pub fn map_rect(&self, rect: &BoundingBox) -> BoundingBox {
        let corners = [
            Point::new(rect.x, rect.y),
            Point::new(rect.right(), rect.y),
            Point::new(rect.x, rect.bottom()),
            Point::new(rect.right(), rect.bottom()),
        ]
        .map(|p| self.image_to_view(p));
        BoundingBox::enclosing(&corners).unwrap_or(*rect)
    }
}

/// Where a capture stands with respect to horizontal mirroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorState {
    /// Nothing to flip (rear camera, imported photo).
    #[default]
    Unmirrored,
    /// Front-camera capture whose pixels are not flipped yet: the view flips.
    SensorMirrored,
    /// Pixels (and landmarks) already flipped: the view must not flip again.
    Baked,
}

impl MirrorState {
    /// Whether rendering should reflect x around the view midline.
    pub fn display_flip(self) -> bool {
        matches!(self, MirrorState::SensorMirrored)
    }

    /// Flip a sensor-mirrored capture's pixels and landmarks in place.
    ///
    /// Only the first call on a `SensorMirrored` capture flips anything; the
    /// state then becomes `Baked` and later calls are no-ops. Returns whether a
    /// flip happened.
    pub fn bake(&mut self, image: &mut DynamicImage, faces: &mut [LandmarkSet]) -> bool {
        if *self != MirrorState::SensorMirrored {
            return false;
        }
        *image = image.fliph();
        let width = image.width();
        for face in faces.iter_mut() {
            *face = flip_landmarks(face, width);
        }
        *self = MirrorState::Baked;
        true
    }

    /// Flip landmarks of a sensor-mirrored capture without touching pixels.
    /// Same idempotence as [`MirrorState::bake`].
    pub fn bake_into(&mut self, set: &mut LandmarkSet, image_width: u32) -> bool {
        if *self != MirrorState::SensorMirrored {
            return false;
        }
        *set = flip_landmarks(set, image_width);
        *self = MirrorState::Baked;
        true
    }
}

impl FromStr for MirrorState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "unmirrored" => Ok(MirrorState::Unmirrored),
            "sensor" | "sensor_mirrored" => Ok(MirrorState::SensorMirrored),
            "baked" => Ok(MirrorState::Baked),
            other => Err(Error::InvalidConfig(format!("unknown mirror state '{}'", other))),
        }
    }
}

/// Reflect landmark x-coordinates within an image of the given width.
pub fn flip_landmarks(set: &LandmarkSet, image_width: u32) -> LandmarkSet {
    let w = image_width as f32;
    set.map_coordinates(|x, y, z| (w - x, y, z))
}
