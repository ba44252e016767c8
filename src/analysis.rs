//! Per-palace geometric features and their readings.
//!
//! For every palace the analyzer measures a few scalar features (landmark
//! distance ratios normalized by face size, and depth fullness), classifies
//! each against fixed empirical thresholds and concatenates the canned text for
//! the resulting bands. Palaces are independent: a palace whose landmarks
//! cannot be resolved yields a "could not locate" result and the others are
//! still analysed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mesh::idx;
use crate::metrics::{self, BandText, Rule, Threshold};
use crate::palace::{PalaceKind, PalaceRegion, PalaceTable};
use crate::types::LandmarkSet;

/// Reading for one palace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PalaceAnalysisResult {
    pub palace: PalaceKind,
    pub name: String,
    pub features: BTreeMap<String, f32>,
    pub description: String,
}

impl PalaceAnalysisResult {
    /// Fixed result for a palace none of whose landmarks could be resolved.
    pub fn not_located(palace: PalaceKind) -> Self {
        Self {
            palace,
            name: palace.name().to_string(),
            features: BTreeMap::new(),
            description: format!(
                "Could not locate the {} palace ({}).",
                palace.name(),
                palace.chinese_name()
            ),
        }
    }

    pub fn is_located(&self) -> bool {
        !self.features.is_empty()
    }

    pub fn feature(&self, name: &str) -> Option<f32> {
        self.features.get(name).copied()
    }
}

/// Whole-face reference measurements shared by all palaces.
///
/// Each measurement is resolved on its own; a missing one only disables the
/// features normalized by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceFrame {
    /// Cheek-to-cheek width.
    pub width: Option<f32>,
    /// Forehead-top to chin height.
    pub height: Option<f32>,
    /// Mean depth over all face points.
    pub mean_z: Option<f32>,
}

impl FaceFrame {
    pub fn measure(set: &LandmarkSet) -> Self {
        Self {
            width: distance(set, idx::LEFT_FACE_BORDER, idx::RIGHT_FACE_BORDER),
            height: distance(set, idx::FOREHEAD_TOP, idx::CHIN),
            mean_z: set.mean_z(),
        }
    }
}

/// Per-side named landmarks, image-left side first.
#[derive(Debug, Clone, Copy)]
struct SideLandmarks {
    prefix: &'static str,
    brow_inner: usize,
    brow_outer: usize,
    brow_peak: usize,
    eye_outer: usize,
    eye_inner: usize,
    eye_top: usize,
    face_border: usize,
}

const SIDES: [SideLandmarks; 2] = [
    SideLandmarks {
        prefix: "left",
        brow_inner: idx::LEFT_BROW_INNER,
        brow_outer: idx::LEFT_BROW_OUTER,
        brow_peak: idx::LEFT_BROW_PEAK,
        eye_outer: idx::LEFT_EYE_OUTER,
        eye_inner: idx::LEFT_EYE_INNER,
        eye_top: idx::LEFT_EYE_TOP,
        face_border: idx::LEFT_FACE_BORDER,
    },
    SideLandmarks {
        prefix: "right",
        brow_inner: idx::RIGHT_BROW_INNER,
        brow_outer: idx::RIGHT_BROW_OUTER,
        brow_peak: idx::RIGHT_BROW_PEAK,
        eye_outer: idx::RIGHT_EYE_OUTER,
        eye_inner: idx::RIGHT_EYE_INNER,
        eye_top: idx::RIGHT_EYE_TOP,
        face_border: idx::RIGHT_FACE_BORDER,
    },
];

const fn rule(
    low: f32,
    high: f32,
    high_text: &'static str,
    mid: &'static str,
    low_text: &'static str,
) -> Rule {
    Rule {
        threshold: Threshold::new(low, high),
        text: BandText {
            high: high_text,
            mid,
            low: low_text,
        },
    }
}

// Ratio rules.
const LIFE_WIDTH: Rule = rule(
    0.14,
    0.22,
    "The space between the brows is open and wide: generous and easy-going.",
    "The space between the brows is well proportioned: steady temperament.",
    "The brows sit close together: focused, but prone to worry.",
);
const NOSE_WIDTH: Rule = rule(
    0.17,
    0.24,
    "Broad nose wings: good at holding on to wealth.",
    "Nose width is balanced: income and spending stay in step.",
    "Narrow nose wings: careful with money, but savings grow slowly.",
);
const NOSE_LENGTH: Rule = rule(
    0.27,
    0.35,
    "A long nose: prudent and principled in financial matters.",
    "Nose length is well proportioned.",
    "A short nose: quick decisions, open-handed with money.",
);
const BROW_EYE: Rule = rule(
    1.15,
    1.6,
    "Eyebrows longer than the eyes: close and supportive siblings and friends.",
    "Eyebrows and eyes are balanced in length: harmonious peer relationships.",
    "Eyebrows shorter than the eyes: independent, relies on oneself.",
);
const BROW_EYE_GAP: Rule = rule(
    0.35,
    0.6,
    "A wide space between brow and eye: open-minded, good fortune with property.",
    "The space between brow and eye is moderate: a stable home life.",
    "Brows sit low over the eyes: driven and serious, property comes through effort.",
);
const JAW_WIDTH: Rule = rule(
    0.75,
    0.9,
    "A broad jaw: commands loyalty and support from others.",
    "Jaw width is balanced: good working relationships.",
    "A narrow jaw: prefers to handle matters personally.",
);
const EYE_TAIL: Rule = rule(
    0.17,
    0.25,
    "A spacious area beside the eye tails: a relaxed and tolerant partner.",
    "The eye-tail area is well proportioned: a harmonious relationship.",
    "The eye tails sit close to the face edge: passionate but demanding in love.",
);
const FOREHEAD_HEIGHT: Rule = rule(
    0.22,
    0.3,
    "A high forehead: strong career prospects and recognition.",
    "Forehead height is balanced: steady career progress.",
    "A low forehead: success comes later, through persistence.",
);

// Fullness rules, on fullness relative to face width.
const LIFE_FULLNESS: Rule = rule(
    0.0,
    0.07,
    "The area between the brows is full: confident and optimistic.",
    "The area between the brows is smooth.",
    "The area between the brows is slightly sunken: keep worries in check.",
);
const WEALTH_FULLNESS: Rule = rule(
    0.10,
    0.18,
    "A prominent nose tip: strong earning drive.",
    "The nose has a moderate profile.",
    "A low nose profile: modest about money.",
);
const CHILDREN_FULLNESS: Rule = rule(
    -0.03,
    0.04,
    "Full under-eye area: warm family bonds.",
    "The under-eye area is smooth: a balanced family life.",
    "Hollow under-eye area: rest and vitality deserve attention.",
);
const SERVANTS_FULLNESS: Rule = rule(
    -0.09,
    -0.01,
    "Full jaw sides: reliable help in later years.",
    "The jaw sides are evenly formed.",
    "Thin jaw sides: support from others must be earned.",
);
const SPOUSE_FULLNESS: Rule = rule(
    -0.12,
    -0.04,
    "Full eye tails: a warm, affectionate relationship.",
    "The eye tails are smooth: stable partnership.",
    "Sunken eye tails: relationships need patience.",
);
const HEALTH_FULLNESS: Rule = rule(
    0.05,
    0.13,
    "A high nose root: robust constitution.",
    "The nose root is of moderate height: generally good health.",
    "A low nose root: pay attention to rest and stamina.",
);
const TRAVEL_FULLNESS: Rule = rule(
    -0.20,
    -0.12,
    "Full temples: travel and relocation bring opportunity.",
    "The temples are evenly formed: comfortable both home and away.",
    "Sunken temples: prefers the familiar to the far away.",
);
const CAREER_FULLNESS: Rule = rule(
    -0.06,
    0.02,
    "A full, rounded forehead: favoured by superiors.",
    "The forehead is smooth and even.",
    "A flat forehead: career built step by step.",
);
const FORTUNE_FULLNESS: Rule = rule(
    -0.14,
    -0.06,
    "Full area above the brow tails: contentment and inner peace.",
    "The area above the brow tails is even: an ordinary share of blessings.",
    "Thin area above the brow tails: happiness comes from effort.",
);
const PARENTS_FULLNESS: Rule = rule(
    -0.08,
    0.0,
    "Full forehead corners: strong support from parents.",
    "The forehead corners are even: a calm relationship with parents.",
    "Flat forehead corners: independent from an early age.",
);

fn distance(set: &LandmarkSet, a: usize, b: usize) -> Option<f32> {
    Some(set.point(a)?.distance(&set.point(b)?))
}

/// Accumulates features and description fragments for one palace.
struct Reading {
    features: BTreeMap<String, f32>,
    sentences: Vec<&'static str>,
}

impl Reading {
    fn new() -> Self {
        Self {
            features: BTreeMap::new(),
            sentences: Vec::new(),
        }
    }

    fn feature(&mut self, name: impl Into<String>, value: f32) {
        self.features.insert(name.into(), value);
    }

    fn describe(&mut self, rule: &Rule, value: f32) {
        self.sentences.push(rule.describe(value));
    }

    /// Record a ratio feature and describe it, if its landmarks resolved.
    fn ratio(&mut self, name: &str, value: Option<f32>, rule: &Rule) {
        if let Some(v) = value {
            self.feature(name, v);
            self.describe(rule, v);
        }
    }

    /// Record one ratio per side plus their symmetry, and describe the mean.
    fn bilateral_ratio(&mut self, name: &str, values: [Option<f32>; 2], rule: &Rule) {
        let mut present = Vec::with_capacity(2);
        for (side, value) in SIDES.iter().zip(values) {
            if let Some(v) = value {
                self.feature(format!("{}_{}", side.prefix, name), v);
                present.push(v);
            }
        }
        if let [l, r] = present[..] {
            self.feature(format!("{}_symmetry", name), metrics::symmetry(l, r));
        }
        if !present.is_empty() {
            let mean = present.iter().sum::<f32>() / present.len() as f32;
            self.describe(rule, mean);
        }
    }

    fn into_result(self, palace: PalaceKind) -> PalaceAnalysisResult {
        PalaceAnalysisResult {
            palace,
            name: palace.name().to_string(),
            features: self.features,
            description: self.sentences.join(" "),
        }
    }
}

/// Computes palace readings from a complete landmark set.
#[derive(Debug, Clone, Default)]
pub struct PalaceAnalyzer {
    table: PalaceTable,
}

impl PalaceAnalyzer {
    pub fn new(table: PalaceTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PalaceTable {
        &self.table
    }

    /// Analyse every palace in the table.
    ///
    /// Returns an empty list unless `set` holds exactly 468 landmarks.
    pub fn analyze(&self, set: &LandmarkSet) -> Vec<PalaceAnalysisResult> {
        if !set.is_complete() {
            warn!(
                points = set.len(),
                "landmark set is incomplete, skipping palace analysis"
            );
            return Vec::new();
        }
        let frame = FaceFrame::measure(set);
        if frame.width.is_none() || frame.height.is_none() {
            warn!("face outline incomplete, skipping size-normalized features");
        }

        let results: Vec<_> = self
            .table
            .regions()
            .iter()
            .map(|region| analyze_region(region, set, &frame))
            .collect();
        debug!(
            located = results.iter().filter(|r| r.is_located()).count(),
            total = results.len(),
            "palace analysis complete"
        );
        results
    }
}

/// Analyse one palace. Never fails: unresolvable regions give
/// [`PalaceAnalysisResult::not_located`].
pub fn analyze_region(
    region: &PalaceRegion,
    set: &LandmarkSet,
    frame: &FaceFrame,
) -> PalaceAnalysisResult {
    let groups: Vec<_> = region.groups.iter().map(|g| set.select(g)).collect();
    if groups.iter().all(|g| g.is_empty()) {
        debug!(palace = %region.kind, "no landmarks resolved for palace");
        return PalaceAnalysisResult::not_located(region.kind);
    }

    let mut reading = Reading::new();
    let width_ratio = |a: usize, b: usize| -> Option<f32> {
        Some(metrics::ratio(distance(set, a, b)?, frame.width?))
    };
    let height_ratio = |a: usize, b: usize| -> Option<f32> {
        Some(metrics::ratio(distance(set, a, b)?, frame.height?))
    };
    let eye_ratio = |side: &SideLandmarks, a: usize, b: usize| -> Option<f32> {
        let eye = distance(set, side.eye_outer, side.eye_inner)?;
        Some(metrics::ratio(distance(set, a, b)?, eye))
    };

    // Fullness of the whole region, then per group for bilateral regions.
    let all: Vec<_> = groups.iter().flatten().copied().collect();
    let fullness = frame.mean_z.and_then(|z| metrics::fullness(z, &all));
    let side_fullness: [Option<f32>; 2] = match frame.mean_z {
        Some(z) if region.is_bilateral() => [
            metrics::fullness(z, &groups[0]),
            metrics::fullness(z, &groups[1]),
        ],
        _ => [None, None],
    };
    let relative = |f: Option<f32>| -> Option<f32> { Some(metrics::ratio(f?, frame.width?)) };

    let midline_fullness = |reading: &mut Reading, rule: &Rule| {
        if let Some(f) = fullness {
            reading.feature("fullness", f);
            if let Some(rel) = relative(Some(f)) {
                reading.feature("relative_fullness", rel);
                reading.describe(rule, rel);
            }
        }
    };
    let bilateral_fullness = |reading: &mut Reading, rule: &Rule| {
        if region.is_bilateral() {
            for (side, f) in SIDES.iter().zip(side_fullness) {
                if let Some(f) = f {
                    reading.feature(format!("{}_fullness", side.prefix), f);
                }
            }
            reading.bilateral_ratio("relative_fullness", side_fullness.map(&relative), rule);
        } else {
            midline_fullness(reading, rule);
        }
    };

    match region.kind {
        PalaceKind::Life => {
            reading.ratio(
                "width_ratio",
                width_ratio(idx::LEFT_BROW_INNER, idx::RIGHT_BROW_INNER),
                &LIFE_WIDTH,
            );
            midline_fullness(&mut reading, &LIFE_FULLNESS);
        }
        PalaceKind::Wealth => {
            reading.ratio(
                "nose_width_ratio",
                width_ratio(idx::LEFT_NOSE_WING, idx::RIGHT_NOSE_WING),
                &NOSE_WIDTH,
            );
            reading.ratio(
                "nose_length_ratio",
                height_ratio(idx::NOSE_ROOT, idx::NOSE_BASE),
                &NOSE_LENGTH,
            );
            midline_fullness(&mut reading, &WEALTH_FULLNESS);
        }
        PalaceKind::Siblings => {
            let values = SIDES.map(|s| eye_ratio(&s, s.brow_outer, s.brow_inner));
            reading.bilateral_ratio("brow_eye_ratio", values, &BROW_EYE);
        }
        PalaceKind::Property => {
            let values = SIDES.map(|s| eye_ratio(&s, s.brow_peak, s.eye_top));
            reading.bilateral_ratio("brow_gap_ratio", values, &BROW_EYE_GAP);
        }
        PalaceKind::Children => bilateral_fullness(&mut reading, &CHILDREN_FULLNESS),
        PalaceKind::Servants => {
            reading.ratio(
                "jaw_width_ratio",
                width_ratio(idx::LEFT_JAW, idx::RIGHT_JAW),
                &JAW_WIDTH,
            );
            bilateral_fullness(&mut reading, &SERVANTS_FULLNESS);
        }
        PalaceKind::Spouse => {
            let values = SIDES.map(|s| width_ratio(s.eye_outer, s.face_border));
            reading.bilateral_ratio("eye_tail_ratio", values, &EYE_TAIL);
            bilateral_fullness(&mut reading, &SPOUSE_FULLNESS);
        }
        PalaceKind::Health => midline_fullness(&mut reading, &HEALTH_FULLNESS),
        PalaceKind::Travel => bilateral_fullness(&mut reading, &TRAVEL_FULLNESS),
        PalaceKind::Career => {
            reading.ratio(
                "forehead_height_ratio",
                height_ratio(idx::FOREHEAD_TOP, idx::GLABELLA),
                &FOREHEAD_HEIGHT,
            );
            midline_fullness(&mut reading, &CAREER_FULLNESS);
        }
        PalaceKind::Fortune => bilateral_fullness(&mut reading, &FORTUNE_FULLNESS),
        PalaceKind::Parents => bilateral_fullness(&mut reading, &PARENTS_FULLNESS),
    }

    if reading.features.is_empty() {
        return PalaceAnalysisResult::not_located(region.kind);
    }
    reading.into_result(region.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::canonical_face;
    use crate::types::{BoundingBox, Landmark};

    fn face() -> LandmarkSet {
        canonical_face(BoundingBox::new(0.0, 0.0, 300.0, 300.0))
    }

    #[test]
    fn canonical_face_reads_all_palaces() {
        let results = PalaceAnalyzer::default().analyze(&face());
        assert_eq!(results.len(), 12);
        for r in &results {
            assert!(r.is_located(), "{} not located", r.name);
            assert!(!r.description.is_empty());
        }
    }

    #[test]
    fn life_palace_width_ratio() {
        let set = face();
        let frame = FaceFrame::measure(&set);
        let region = PalaceTable::standard().region(PalaceKind::Life).copied().unwrap();
        let result = analyze_region(&region, &set, &frame);

        // Brow heads 0.16 apart on a 0.90 wide face.
        let ratio = result.feature("width_ratio").unwrap();
        assert!((ratio - 0.16 / 0.90).abs() < 1e-3);
        assert!(result.description.contains("well proportioned"));
    }

    #[test]
    fn nose_protrudes_on_canonical_face() {
        let set = face();
        let frame = FaceFrame::measure(&set);
        let region = PalaceTable::standard().region(PalaceKind::Wealth).copied().unwrap();
        let result = analyze_region(&region, &set, &frame);
        assert!(result.feature("fullness").unwrap() > 0.0);
    }

    #[test]
    fn unresolvable_palace_is_not_located() {
        let set = face();
        let frame = FaceFrame::measure(&set);
        // Indices past the mesh never resolve.
        let region = PalaceRegion::new(PalaceKind::Fortune, &[&[600, 601], &[602, 603]]);
        let result = analyze_region(&region, &set, &frame);

        assert!(!result.is_located());
        assert!(result.features.is_empty());
        assert_eq!(
            result,
            PalaceAnalysisResult::not_located(PalaceKind::Fortune)
        );
    }

    #[test]
    fn incomplete_set_short_circuits() {
        let mut set = face();
        set.landmarks.truncate(400);
        assert!(PalaceAnalyzer::default().analyze(&set).is_empty());
        let empty = LandmarkSet::new(Vec::new(), BoundingBox::new(0.0, 0.0, 0.0, 0.0));
        assert!(PalaceAnalyzer::default().analyze(&empty).is_empty());
    }

    #[test]
    fn missing_points_are_skipped_not_fatal() {
        // Replace the left eyebrow head with an index that does not exist;
        // the set still has 468 entries.
        let mut set = face();
        set.landmarks[idx::LEFT_BROW_INNER] = Landmark::new(999, 0.0, 0.0, 0.0);
        let results = PalaceAnalyzer::default().analyze(&set);
        assert_eq!(results.len(), 12);

        let siblings = results.iter().find(|r| r.palace == PalaceKind::Siblings).unwrap();
        assert!(siblings.feature("left_brow_eye_ratio").is_none());
        assert!(siblings.feature("right_brow_eye_ratio").is_some());
        assert!(siblings.feature("brow_eye_ratio_symmetry").is_none());
    }

    #[test]
    fn missing_face_border_only_disables_width_features() {
        // Still 468 entries, but the image-left cheek cannot be resolved.
        let mut set = face();
        set.landmarks[idx::LEFT_FACE_BORDER] = Landmark::new(999, 0.0, 0.0, 0.0);
        assert!(set.is_complete());
        assert!(FaceFrame::measure(&set).width.is_none());

        let results = PalaceAnalyzer::default().analyze(&set);
        assert_eq!(results.len(), 12);
        let find = |kind| results.iter().find(|r| r.palace == kind).unwrap();

        // Eye-normalized ratios and raw fullness do not need the face width.
        let siblings = find(PalaceKind::Siblings);
        assert!(siblings.feature("left_brow_eye_ratio").is_some());
        assert!(find(PalaceKind::Property).is_located());
        let health = find(PalaceKind::Health);
        assert!(health.feature("fullness").is_some());
        assert!(health.feature("relative_fullness").is_none());

        // Height-normalized ratios survive, width-normalized ones are skipped.
        let wealth = find(PalaceKind::Wealth);
        assert!(wealth.feature("nose_length_ratio").is_some());
        assert!(wealth.feature("nose_width_ratio").is_none());
        assert!(find(PalaceKind::Life).feature("width_ratio").is_none());
    }

    #[test]
    fn palace_without_usable_features_is_not_located() {
        let set = face();
        let frame = FaceFrame {
            width: None,
            height: None,
            mean_z: None,
        };
        let region = PalaceTable::standard().region(PalaceKind::Life).copied().unwrap();
        assert_eq!(
            analyze_region(&region, &set, &frame),
            PalaceAnalysisResult::not_located(PalaceKind::Life)
        );
    }

    #[test]
    fn bands_follow_geometry() {
        // Pull the brow heads apart: the life palace reads as wide.
        let mut set = face();
        set.landmarks[idx::LEFT_BROW_INNER].x -= 30.0;
        set.landmarks[idx::RIGHT_BROW_INNER].x += 30.0;
        let frame = FaceFrame::measure(&set);
        let region = PalaceTable::standard().region(PalaceKind::Life).copied().unwrap();
        let result = analyze_region(&region, &set, &frame);
        assert!(result.description.contains("open and wide"));
    }
}
