//! Complete reading of one face and its flat text form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::{PalaceAnalysisResult, PalaceAnalyzer};
use crate::proportions::{analyze_three_courts_five_eyes, ThreeCourtFiveEyeResult};
use crate::types::{LandmarkSet, MESH_POINT_COUNT};

/// Key of the three-court description in [`FaceReading::prompt_fields`].
pub const THREE_COURTS_KEY: &str = "three_courts";
/// Key of the five-eye description in [`FaceReading::prompt_fields`].
pub const FIVE_EYES_KEY: &str = "five_eyes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReading {
    pub landmark_count: usize,
    pub palaces: Vec<PalaceAnalysisResult>,
    pub proportions: Option<ThreeCourtFiveEyeResult>,
    /// Explanation when the reading is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FaceReading {
    /// An empty reading for input that cannot be analysed.
    pub fn unavailable(landmark_count: usize, message: impl Into<String>) -> Self {
        Self {
            landmark_count,
            palaces: Vec::new(),
            proportions: None,
            message: Some(message.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.palaces.is_empty() && self.proportions.is_none()
    }

    /// Palace name → description, plus the three-court and five-eye texts.
    pub fn prompt_fields(&self) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = self
            .palaces
            .iter()
            .map(|p| (p.name.clone(), p.description.clone()))
            .collect();
        if let Some(p) = &self.proportions {
            fields.insert(
                THREE_COURTS_KEY.to_string(),
                p.three_courts.description.clone(),
            );
            fields.insert(FIVE_EYES_KEY.to_string(), p.five_eyes.description.clone());
        }
        fields
    }
}

/// Palace readings and proportions for one face. Incomplete sets give an
/// empty reading with an explanatory message.
pub fn analyze_face(set: &LandmarkSet, analyzer: &PalaceAnalyzer) -> FaceReading {
    if !set.is_complete() {
        return FaceReading::unavailable(
            set.len(),
            format!(
                "Face analysis needs {} landmarks, got {}.",
                MESH_POINT_COUNT,
                set.len()
            ),
        );
    }
    FaceReading {
        landmark_count: set.len(),
        palaces: analyzer.analyze(set),
        proportions: analyze_three_courts_five_eyes(set),
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::canonical_face;
    use crate::types::BoundingBox;

    #[test]
    fn prompt_fields_cover_everything() {
        let face = canonical_face(BoundingBox::new(0.0, 0.0, 240.0, 300.0));
        let reading = analyze_face(&face, &PalaceAnalyzer::default());
        assert!(!reading.is_empty());

        let fields = reading.prompt_fields();
        assert_eq!(fields.len(), 14);
        assert!(fields.contains_key("life"));
        assert!(fields.contains_key(THREE_COURTS_KEY));
        assert!(fields[FIVE_EYES_KEY].starts_with("Five eyes"));
        assert!(fields.values().all(|v| !v.is_empty()));
    }

    #[test]
    fn incomplete_face_is_neutral() {
        let mut face = canonical_face(BoundingBox::new(0.0, 0.0, 240.0, 300.0));
        face.landmarks.truncate(10);
        let reading = analyze_face(&face, &PalaceAnalyzer::default());
        assert!(reading.is_empty());
        assert!(reading.prompt_fields().is_empty());
        assert!(reading.message.unwrap().contains("468"));
    }

    #[test]
    fn reading_serializes() {
        let face = canonical_face(BoundingBox::new(0.0, 0.0, 240.0, 300.0));
        let reading = analyze_face(&face, &PalaceAnalyzer::default());
        let json = serde_json::to_string(&reading).unwrap();
        let back: FaceReading = serde_json::from_str(&json).unwrap();
        assert_eq!(back.palaces.len(), 12);
        assert!(!json.contains("\"message\""));
    }
}
