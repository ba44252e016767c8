//! Geometric measurements on landmark groups.
//!
//! Distances, depth averages and the band classifier that the palace and
//! proportion analyzers build on. Every helper tolerates empty input and zero
//! denominators so that a missing landmark never aborts an analysis.

use serde::{Deserialize, Serialize};

use crate::types::{Landmark, Point};

/// Mean depth of a group of landmarks, `None` when the group is empty.
pub fn mean_z(landmarks: &[Landmark]) -> Option<f32> {
    if landmarks.is_empty() {
        return None;
    }
    Some(landmarks.iter().map(|l| l.z).sum::<f32>() / landmarks.len() as f32)
}

/// Centroid of a group of landmarks in image coordinates.
pub fn centroid(landmarks: &[Landmark]) -> Option<Point> {
    if landmarks.is_empty() {
        return None;
    }
    let n = landmarks.len() as f32;
    let (sx, sy) = landmarks
        .iter()
        .fold((0.0, 0.0), |(sx, sy), l| (sx + l.x, sy + l.y));
    Some(Point::new(sx / n, sy / n))
}

/// Depth protrusion of a region relative to the whole face.
///
/// `face_mean_z - mean_z(region)`: positive when the region sits closer to the
/// camera than the face average, negative when it is recessed.
pub fn fullness(face_mean_z: f32, region: &[Landmark]) -> Option<f32> {
    mean_z(region).map(|region_z| face_mean_z - region_z)
}

/// Ratio that returns 0 instead of dividing by a non-positive denominator.
pub fn ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Symmetry of two magnitudes: 1.0 when equal, towards 0 as they diverge.
pub fn symmetry(a: f32, b: f32) -> f32 {
    let (a, b) = (a.abs(), b.abs());
    if a == 0.0 && b == 0.0 {
        1.0
    } else {
        ratio(a.min(b), a.max(b))
    }
}

/// Qualitative band of a measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Low,
    Mid,
    High,
}

/// Empirical thresholds splitting a metric into three bands.
///
/// Values strictly above `high` are [`Band::High`], strictly below `low` are
/// [`Band::Low`], everything in between is [`Band::Mid`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub low: f32,
    pub high: f32,
}

impl Threshold {
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    pub fn classify(&self, value: f32) -> Band {
        if value > self.high {
            Band::High
        } else if value < self.low {
            Band::Low
        } else {
            Band::Mid
        }
    }
}

/// Canned description for each band of one metric.
#[derive(Debug, Clone, Copy)]
pub struct BandText {
    pub high: &'static str,
    pub mid: &'static str,
    pub low: &'static str,
}

impl BandText {
    pub fn for_band(&self, band: Band) -> &'static str {
        match band {
            Band::High => self.high,
            Band::Mid => self.mid,
            Band::Low => self.low,
        }
    }
}

/// A metric's thresholds paired with the text for each band.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub threshold: Threshold,
    pub text: BandText,
}

impl Rule {
    pub fn describe(&self, value: f32) -> &'static str {
        self.text.for_band(self.threshold.classify(value))
    }
}
