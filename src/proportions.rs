//! Three courts (vertical thirds) and five eyes (horizontal fifths).
//!
//! The mesh has no hairline landmark, so the upper court cannot be measured:
//! its height is taken to be equal to the middle court and the result carries
//! `upper_estimated = true`. Everything derived from the upper court (its
//! ratio, the virtual forehead guide line) inherits that approximation.

use serde::{Deserialize, Serialize};

use crate::mesh::idx;
use crate::metrics::{ratio, Band, BandText, Rule, Threshold};
use crate::types::LandmarkSet;

/// Vertical thirds of the face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeCourtResult {
    pub upper_height: f32,
    pub middle_height: f32,
    pub lower_height: f32,
    pub upper_ratio: f32,
    pub middle_ratio: f32,
    pub lower_ratio: f32,
    /// Always true: the upper court is estimated, not measured.
    pub upper_estimated: bool,
    /// Virtual forehead line, brow line, nose-base line, chin line.
    pub guide_lines_y: [f32; 4],
    pub description: String,
}

/// Horizontal fifths of the face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiveEyeResult {
    /// Border→outer, outer→inner, inner→inner, inner→outer, outer→border.
    pub segments: [f32; 5],
    /// `segments` normalized by their sum.
    pub ratios: [f32; 5],
    /// Inter-eye gap over the image-left eye width.
    pub gap_to_eye: f32,
    pub balance: Band,
    /// The six landmark x-positions the segments are measured between.
    pub guide_lines_x: [f32; 6],
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeCourtFiveEyeResult {
    pub three_courts: ThreeCourtResult,
    pub five_eyes: FiveEyeResult,
}

const MIDDLE_COURT: Rule = Rule {
    threshold: Threshold::new(0.30, 0.37),
    text: BandText {
        high: "A long middle court: strong will and an active middle age.",
        mid: "The middle court is well proportioned.",
        low: "A short middle court: relies on careful planning rather than impulse.",
    },
};

const LOWER_COURT: Rule = Rule {
    threshold: Threshold::new(0.26, 0.37),
    text: BandText {
        high: "A long lower court: a comfortable and well supported later life.",
        mid: "The lower court is well proportioned.",
        low: "A short lower court: later years call for forward planning.",
    },
};

const EYE_GAP: Threshold = Threshold::new(0.85, 1.15);

const EYE_GAP_TEXT: BandText = BandText {
    high: "The eyes are set wide apart: broad-minded and tolerant.",
    mid: "The gap between the eyes matches one eye width: the five eyes are balanced.",
    low: "The eyes are set close together: attentive to detail and focused.",
};

fn percent(value: f32) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Compute the three courts. `None` when a required landmark is missing or the
/// middle court or total height is not positive.
pub fn analyze_three_courts(set: &LandmarkSet) -> Option<ThreeCourtResult> {
    let brow_y = (set.point(idx::LEFT_BROW_INNER)?.y + set.point(idx::RIGHT_BROW_INNER)?.y) / 2.0;
    let nose_base_y = set.point(idx::NOSE_BASE)?.y;
    let chin_y = set.point(idx::CHIN)?.y;

    let middle = nose_base_y - brow_y;
    let lower = chin_y - nose_base_y;
    if middle <= 0.0 {
        return None;
    }
    let upper = middle;
    let total = upper + middle + lower;
    if total <= 0.0 {
        return None;
    }

    let (upper_ratio, middle_ratio, lower_ratio) =
        (ratio(upper, total), ratio(middle, total), ratio(lower, total));
    let description = format!(
        "Upper court {} (estimated), middle court {}, lower court {}. {} {}",
        percent(upper_ratio),
        percent(middle_ratio),
        percent(lower_ratio),
        MIDDLE_COURT.describe(middle_ratio),
        LOWER_COURT.describe(lower_ratio),
    );

    Some(ThreeCourtResult {
        upper_height: upper,
        middle_height: middle,
        lower_height: lower,
        upper_ratio,
        middle_ratio,
        lower_ratio,
        upper_estimated: true,
        guide_lines_y: [brow_y - upper, brow_y, nose_base_y, chin_y],
        description,
    })
}

/// Compute the five eyes. `None` when a required landmark is missing or the
/// summed width is not positive.
pub fn analyze_five_eyes(set: &LandmarkSet) -> Option<FiveEyeResult> {
    let xs = [
        set.point(idx::LEFT_FACE_BORDER)?.x,
        set.point(idx::LEFT_EYE_OUTER)?.x,
        set.point(idx::LEFT_EYE_INNER)?.x,
        set.point(idx::RIGHT_EYE_INNER)?.x,
        set.point(idx::RIGHT_EYE_OUTER)?.x,
        set.point(idx::RIGHT_FACE_BORDER)?.x,
    ];
    // Absolute widths so a mirrored set measures the same.
    let segments: [f32; 5] = std::array::from_fn(|i| (xs[i + 1] - xs[i]).abs());
    let total: f32 = segments.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let ratios = segments.map(|s| ratio(s, total));
    let gap_to_eye = ratio(segments[2], segments[1]);
    let balance = EYE_GAP.classify(gap_to_eye);

    let description = format!(
        "Five eyes: {}. {}",
        ratios.iter().map(|r| percent(*r)).collect::<Vec<_>>().join(" / "),
        EYE_GAP_TEXT.for_band(balance),
    );

    Some(FiveEyeResult {
        segments,
        ratios,
        gap_to_eye,
        balance,
        guide_lines_x: xs,
        description,
    })
}

/// Both proportion readings for a complete landmark set.
pub fn analyze_three_courts_five_eyes(set: &LandmarkSet) -> Option<ThreeCourtFiveEyeResult> {
    if !set.is_complete() {
        return None;
    }
    Some(ThreeCourtFiveEyeResult {
        three_courts: analyze_three_courts(set)?,
        five_eyes: analyze_five_eyes(set)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::canonical_face;
    use crate::types::BoundingBox;

    fn face() -> LandmarkSet {
        canonical_face(BoundingBox::new(0.0, 0.0, 100.0, 100.0))
    }

    #[test]
    fn three_courts_on_canonical_face() {
        let courts = analyze_three_courts(&face()).unwrap();
        // Brows at y=33, nose base at 69, chin at 98.
        assert!((courts.middle_height - 36.0).abs() < 1e-3);
        assert!((courts.lower_height - 29.0).abs() < 1e-3);
        assert_eq!(courts.upper_height, courts.middle_height);
        assert!(courts.upper_estimated);

        let sum = courts.upper_ratio + courts.middle_ratio + courts.lower_ratio;
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((courts.guide_lines_y[0] - -3.0).abs() < 1e-3);
        assert!((courts.guide_lines_y[3] - 98.0).abs() < 1e-3);
        assert!(courts.description.contains("35.6%"));
        assert!(courts.description.contains("28.7%"));
    }

    #[test]
    fn degenerate_courts_return_none() {
        let mut set = face();
        // Nose base level with the brows: zero middle court.
        let brow_y = set.point(idx::LEFT_BROW_INNER).unwrap().y;
        set.landmarks[idx::NOSE_BASE].y = brow_y;
        assert!(analyze_three_courts(&set).is_none());

        // Upside-down geometry: negative middle court.
        set.landmarks[idx::NOSE_BASE].y = brow_y - 10.0;
        assert!(analyze_three_courts(&set).is_none());

        // Chin far above the nose: total height collapses below zero.
        let mut set = face();
        set.landmarks[idx::CHIN].y = -200.0;
        assert!(analyze_three_courts(&set).is_none());
    }

    #[test]
    fn five_eyes_on_canonical_face() {
        let eyes = analyze_five_eyes(&face()).unwrap();
        assert!((eyes.segments[0] - 17.0).abs() < 1e-3);
        assert!((eyes.segments[2] - 20.0).abs() < 1e-3);
        assert!((eyes.segments[0] - eyes.segments[4]).abs() < 1e-3);
        assert!((eyes.ratios.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(eyes.balance, Band::Mid);
        assert!((eyes.guide_lines_x[0] - 5.0).abs() < 1e-3);
        assert!((eyes.guide_lines_x[5] - 95.0).abs() < 1e-3);
    }

    #[test]
    fn wide_set_eyes() {
        let mut set = face();
        set.landmarks[idx::LEFT_EYE_INNER].x -= 5.0;
        set.landmarks[idx::RIGHT_EYE_INNER].x += 5.0;
        let eyes = analyze_five_eyes(&set).unwrap();
        // Gap 30 over eye width 13.
        assert_eq!(eyes.balance, Band::High);
        assert!(eyes.description.contains("wide apart"));
    }

    #[test]
    fn zero_width_returns_none() {
        let mut set = face();
        for i in [
            idx::LEFT_FACE_BORDER,
            idx::LEFT_EYE_OUTER,
            idx::LEFT_EYE_INNER,
            idx::RIGHT_EYE_INNER,
            idx::RIGHT_EYE_OUTER,
            idx::RIGHT_FACE_BORDER,
        ] {
            set.landmarks[i].x = 50.0;
        }
        assert!(analyze_five_eyes(&set).is_none());
    }

    #[test]
    fn combined_requires_complete_set() {
        assert!(analyze_three_courts_five_eyes(&face()).is_some());
        let mut set = face();
        set.landmarks.pop();
        assert!(analyze_three_courts_five_eyes(&set).is_none());
    }
}
