//! Frame-to-frame landmark smoothing with outlier rejection.
//!
//! A [`LandmarkStabilizer`] is one capture/preview session's worth of state:
//! a short rolling history per landmark index. Callers own it and pass it to
//! wherever frames arrive; two sessions never share history.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StabilizerConfig;
use crate::types::{BoundingBox, DetectionFrame, ImageSize, Landmark, LandmarkSet, Point};

/// Rolling history of smoothed positions for one landmark index, each with
/// the timestamp of the frame it came from.
#[derive(Debug, Clone)]
pub struct KeypointHistory {
    points: VecDeque<(Point, u64)>,
    capacity: usize,
}

impl KeypointHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity + 1),
            capacity: capacity.max(1),
        }
    }

    /// Append a point, evicting the oldest beyond capacity.
    pub fn push(&mut self, p: Point, timestamp_ms: u64) {
        self.points.push_back((p, timestamp_ms));
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<Point> {
        self.points.back().map(|&(p, _)| p)
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.points.back().map(|&(_, t)| t)
    }

    /// Time between the oldest and newest entry.
    pub fn span_ms(&self) -> u64 {
        match (self.points.front(), self.points.back()) {
            (Some(&(_, first)), Some(&(_, last))) => last.saturating_sub(first),
            _ => 0,
        }
    }

    pub fn mean(&self) -> Option<Point> {
        if self.points.is_empty() {
            return None;
        }
        let n = self.points.len() as f32;
        let sum = self.points.iter().fold(Point::zero(), |acc, &(p, _)| acc + p);
        Some(sum * (1.0 / n))
    }

    /// Root-mean-square distance of the history from its mean.
    pub fn variance(&self) -> f32 {
        let Some(mean) = self.mean() else {
            return 0.0;
        };
        let sum_sq: f32 = self
            .points
            .iter()
            .map(|(p, _)| {
                let d = p.distance(&mean);
                d * d
            })
            .sum();
        (sum_sq / self.points.len() as f32).sqrt()
    }
}

/// Stabilized output for one landmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilizedPoint {
    pub index: usize,
    pub position: Point,
    pub is_stable: bool,
    /// Replaced by a blend with the history mean.
    pub is_outlier: bool,
    /// Outside the image and clamped.
    pub out_of_bounds: bool,
    pub confidence: f32,
    pub variance: f32,
}

impl StabilizedPoint {
    pub fn is_low_confidence(&self) -> bool {
        self.is_outlier || self.out_of_bounds
    }
}

/// Aggregate quality over all points of a frame, each term in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StabilityQuality {
    pub stable_fraction: f32,
    pub mean_confidence: f32,
    pub outlier_fraction: f32,
    pub aspect_score: f32,
    pub overall: f32,
}

impl StabilityQuality {
    pub fn from_points(points: &[StabilizedPoint]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let n = points.len() as f32;
        let stable_fraction = points.iter().filter(|p| p.is_stable).count() as f32 / n;
        let mean_confidence = points.iter().map(|p| p.confidence).sum::<f32>() / n;
        let outlier_fraction = points.iter().filter(|p| p.is_low_confidence()).count() as f32 / n;

        // A frontal face spreads roughly as wide as it is tall.
        let positions: Vec<Point> = points.iter().map(|p| p.position).collect();
        let aspect_score = match BoundingBox::enclosing(&positions) {
            Some(b) if b.height > 0.0 && (0.6..=1.4).contains(&(b.width / b.height)) => 1.0,
            _ => 0.5,
        };

        let overall = 0.4 * stable_fraction
            + 0.3 * mean_confidence
            + 0.2 * (1.0 - outlier_fraction)
            + 0.1 * aspect_score;

        Self {
            stable_fraction,
            mean_confidence,
            outlier_fraction,
            aspect_score,
            overall: overall.clamp(0.0, 1.0),
        }
    }
}

/// Result of stabilizing one face.
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizedFrame {
    pub points: Vec<StabilizedPoint>,
    /// The input set with smoothed x/y; z and the bounding box are unchanged.
    pub landmarks: LandmarkSet,
    pub quality: StabilityQuality,
}

/// Per-session landmark smoother.
#[derive(Debug, Clone)]
pub struct LandmarkStabilizer {
    config: StabilizerConfig,
    histories: HashMap<usize, KeypointHistory>,
    last_update_ms: Option<u64>,
}

impl Default for LandmarkStabilizer {
    fn default() -> Self {
        Self::new(StabilizerConfig::default())
    }
}

impl LandmarkStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config,
            histories: HashMap::new(),
            last_update_ms: None,
        }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Drop all history.
    pub fn clear(&mut self) {
        self.histories.clear();
        self.last_update_ms = None;
    }

    pub fn history(&self, index: usize) -> Option<&KeypointHistory> {
        self.histories.get(&index)
    }

    /// Number of landmark indices with history.
    pub fn tracked(&self) -> usize {
        self.histories.len()
    }

    /// Stabilize the primary face of a detection frame.
    pub fn stabilize_frame(&mut self, frame: &DetectionFrame) -> Option<StabilizedFrame> {
        let face = frame.primary_face()?;
        Some(self.stabilize(face, frame.image_size, frame.timestamp_ms))
    }

    /// Stabilize one landmark set observed at `now_ms`.
    ///
    /// A gap of more than `idle_reset_ms` since the previous call starts a new
    /// session: all history is discarded first.
    pub fn stabilize(
        &mut self,
        set: &LandmarkSet,
        image_size: ImageSize,
        now_ms: u64,
    ) -> StabilizedFrame {
        if let Some(last) = self.last_update_ms {
            let idle = now_ms.saturating_sub(last);
            if idle > self.config.idle_reset_ms {
                debug!(
                    idle_ms = idle,
                    tracked = self.histories.len(),
                    "stabilizer idle, resetting history"
                );
                self.histories.clear();
            }
        }
        self.last_update_ms = Some(now_ms);

        let points: Vec<StabilizedPoint> = set
            .landmarks
            .iter()
            .map(|l| self.stabilize_point(l.index, l.point(), image_size, now_ms))
            .collect();

        let landmarks = set
            .landmarks
            .iter()
            .zip(&points)
            .map(|(l, p)| Landmark::new(l.index, p.position.x, p.position.y, l.z))
            .collect();

        StabilizedFrame {
            quality: StabilityQuality::from_points(&points),
            landmarks: LandmarkSet::new(landmarks, set.bounding_box),
            points,
        }
    }

    /// Stabilize a single observation of landmark `index` from the frame at
    /// `timestamp_ms`.
    pub fn stabilize_point(
        &mut self,
        index: usize,
        raw: Point,
        image_size: ImageSize,
        timestamp_ms: u64,
    ) -> StabilizedPoint {
        let cfg = &self.config;

        if !image_size.is_empty() {
            let (w, h) = (image_size.width as f32, image_size.height as f32);
            if !(0.0..=w).contains(&raw.x) || !(0.0..=h).contains(&raw.y) {
                return StabilizedPoint {
                    index,
                    position: Point::new(raw.x.clamp(0.0, w), raw.y.clamp(0.0, h)),
                    is_stable: false,
                    is_outlier: false,
                    out_of_bounds: true,
                    confidence: cfg.low_confidence,
                    variance: 0.0,
                };
            }
        }

        let history = self
            .histories
            .entry(index)
            .or_insert_with(|| KeypointHistory::new(cfg.history_size));

        let mut is_outlier = false;
        let position = match history.mean() {
            Some(mean) if history.len() >= 2 && raw.distance(&mean) > cfg.outlier_threshold => {
                is_outlier = true;
                mean.blend(&raw, 0.8)
            }
            _ => match history.last() {
                Some(last) => last.blend(&raw, cfg.smoothing_factor),
                None => raw,
            },
        };

        history.push(position, timestamp_ms);
        let variance = history.variance();
        let is_stable = !is_outlier && history.len() >= 2 && variance < cfg.stability_threshold;
        let fill = history.len() as f32 / cfg.history_size.max(1) as f32;
        let confidence = (0.7 / (1.0 + variance) + 0.3 * fill).max(cfg.min_confidence);

        StabilizedPoint {
            index,
            position,
            is_stable,
            is_outlier,
            out_of_bounds: false,
            confidence,
            variance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{canonical_face, idx};

    const IMAGE: ImageSize = ImageSize::new(640, 480);

    #[test]
    fn repeated_point_converges() {
        let mut s = LandmarkStabilizer::default();
        let p = Point::new(100.0, 120.0);

        let first = s.stabilize_point(1, p, IMAGE, 0);
        assert!(!first.is_stable);
        assert_eq!(first.position, p);

        let mut last_variance = first.variance;
        for _ in 0..6 {
            let out = s.stabilize_point(1, p, IMAGE, 0);
            assert!(out.is_stable);
            assert!(out.variance <= last_variance);
            last_variance = out.variance;
        }
        assert_eq!(s.history(1).unwrap().len(), 5);
    }

    #[test]
    fn smoothing_uses_last_smoothed_value() {
        let mut s = LandmarkStabilizer::default();
        s.stabilize_point(7, Point::new(100.0, 100.0), IMAGE, 0);
        let out = s.stabilize_point(7, Point::new(110.0, 100.0), IMAGE, 0);
        // 0.7 * 100 + 0.3 * 110
        assert!((out.position.x - 103.0).abs() < 1e-4);
        let out = s.stabilize_point(7, Point::new(110.0, 100.0), IMAGE, 0);
        assert!((out.position.x - (0.7 * 103.0 + 0.3 * 110.0)).abs() < 1e-4);
    }

    #[test]
    fn far_jump_is_blended_outlier() {
        let mut s = LandmarkStabilizer::default();
        let p = Point::new(200.0, 200.0);
        for _ in 0..5 {
            s.stabilize_point(3, p, IMAGE, 0);
        }
        let jump = Point::new(260.0, 200.0);
        let out = s.stabilize_point(3, jump, IMAGE, 0);
        assert!(out.is_outlier);
        assert!(!out.is_stable);
        assert_ne!(out.position, jump);
        // 80% history mean, 20% raw.
        assert!((out.position.x - 212.0).abs() < 1e-3);
    }

    #[test]
    fn out_of_bounds_is_clamped() {
        let mut s = LandmarkStabilizer::default();
        let out = s.stabilize_point(9, Point::new(-20.0, 500.0), IMAGE, 0);
        assert!(out.out_of_bounds);
        assert_eq!(out.position, Point::new(0.0, 480.0));
        assert!((out.confidence - 0.1).abs() < 1e-6);
        assert!(s.history(9).is_none());
    }

    #[test]
    fn history_keeps_frame_timestamps() {
        let mut s = LandmarkStabilizer::default();
        let face = canonical_face(BoundingBox::new(200.0, 100.0, 200.0, 240.0));
        for ts in [0, 33, 66, 100, 133, 166] {
            s.stabilize(&face, IMAGE, ts);
        }
        // Five entries kept: the frame at 0 was evicted.
        let history = s.history(idx::NOSE_TIP).unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.last_timestamp(), Some(166));
        assert_eq!(history.span_ms(), 133);
    }

    #[test]
    fn idle_gap_resets_history() {
        let mut s = LandmarkStabilizer::default();
        let face = canonical_face(BoundingBox::new(200.0, 100.0, 200.0, 240.0));
        s.stabilize(&face, IMAGE, 0);
        s.stabilize(&face, IMAGE, 1000);
        assert_eq!(s.history(4).unwrap().len(), 2);

        s.stabilize(&face, IMAGE, 3500);
        assert_eq!(s.history(4).unwrap().len(), 1);

        s.clear();
        assert_eq!(s.tracked(), 0);
    }

    #[test]
    fn steady_face_quality() {
        let mut s = LandmarkStabilizer::default();
        let face = canonical_face(BoundingBox::new(200.0, 100.0, 200.0, 220.0));
        let mut frame = s.stabilize(&face, IMAGE, 0);
        // Nothing is stable after one observation.
        assert_eq!(frame.quality.stable_fraction, 0.0);
        for t in 1..5 {
            frame = s.stabilize(&face, IMAGE, t * 33);
        }
        assert!((frame.quality.stable_fraction - 1.0).abs() < 1e-6);
        assert_eq!(frame.quality.outlier_fraction, 0.0);
        assert_eq!(frame.quality.aspect_score, 1.0);
        assert!(frame.quality.overall > 0.9 && frame.quality.overall <= 1.0);
        assert_eq!(frame.landmarks.len(), face.len());
    }

    #[test]
    fn sessions_are_independent() {
        let mut a = LandmarkStabilizer::default();
        let b = LandmarkStabilizer::default();
        a.stabilize_point(0, Point::new(10.0, 10.0), IMAGE, 0);
        assert!(a.history(0).is_some());
        assert!(b.history(0).is_none());
    }
}
