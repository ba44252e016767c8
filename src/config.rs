//! Operational settings for the detection, stabilization and preview stages.
//!
//! Every field has a default, so a JSON file only needs the values it changes:
//!
//! ```json
//! { "detection": { "strategy_timeout_ms": 2000 }, "preview": { "min_frame_interval_ms": 150 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Weight of the previous smoothed value in exponential smoothing.
    pub smoothing_factor: f32,
    /// Distance from the history mean beyond which a point is an outlier.
    pub outlier_threshold: f32,
    pub history_size: usize,
    /// Gap between calls after which all history is discarded.
    pub idle_reset_ms: u64,
    /// RMS deviation below which a history counts as stable.
    pub stability_threshold: f32,
    pub min_confidence: f32,
    /// Confidence given to points clamped into the image.
    pub low_confidence: f32,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.7,
            outlier_threshold: 15.0,
            history_size: 5,
            idle_reset_ms: 2000,
            stability_threshold: 2.0,
            min_confidence: 0.1,
            low_confidence: 0.1,
        }
    }
}

/// Extra margin around a coarse face box, as fractions of its size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropPadding {
    pub horizontal: f32,
    /// Above the box; larger, so the forehead is kept.
    pub top: f32,
    pub bottom: f32,
}

impl Default for CropPadding {
    fn default() -> Self {
        Self {
            horizontal: 0.25,
            top: 0.40,
            bottom: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub padding: CropPadding,
    /// Face crops with a shorter side below this are upscaled.
    pub min_working_size: u32,
    /// Scale factors tried, in order, by the multi-resolution strategy.
    pub scales: Vec<f32>,
    pub contrast: f32,
    pub brightness: i32,
    /// Longest image side accepted before detection; larger images are downscaled.
    pub max_image_dimension: u32,
    pub strategy_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            padding: CropPadding::default(),
            min_working_size: 256,
            scales: vec![1.0, 0.8, 1.2, 0.6, 1.5],
            contrast: 20.0,
            brightness: 10,
            max_image_dimension: 1920,
            strategy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub min_frame_interval_ms: u64,
    pub history_size: usize,
    pub detection_timeout_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: 100,
            history_size: 5,
            detection_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stabilizer: StabilizerConfig,
    pub detection: DetectionConfig,
    pub preview: PreviewConfig,
}

impl PipelineConfig {
    /// Read a JSON config file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.stabilizer;
        if !(0.0..1.0).contains(&s.smoothing_factor) {
            return Err(invalid("stabilizer.smoothing_factor must be in [0, 1)"));
        }
        if s.outlier_threshold <= 0.0 || s.stability_threshold <= 0.0 {
            return Err(invalid("stabilizer thresholds must be positive"));
        }
        if s.history_size < 2 {
            return Err(invalid("stabilizer.history_size must be at least 2"));
        }
        if !(0.0..=1.0).contains(&s.min_confidence) || !(0.0..=1.0).contains(&s.low_confidence) {
            return Err(invalid("stabilizer confidences must be in [0, 1]"));
        }

        let d = &self.detection;
        let p = &d.padding;
        if [p.horizontal, p.top, p.bottom].iter().any(|v| *v < 0.0) {
            return Err(invalid("detection.padding must not be negative"));
        }
        if d.scales.is_empty() || d.scales.iter().any(|s| *s <= 0.0) {
            return Err(invalid(
                "detection.scales must be a non-empty list of positive factors",
            ));
        }
        if d.max_image_dimension == 0 || d.min_working_size == 0 {
            return Err(invalid("detection image sizes must be positive"));
        }
        if d.strategy_timeout_ms == 0 {
            return Err(invalid("detection.strategy_timeout_ms must be positive"));
        }

        if self.preview.history_size == 0 || self.preview.detection_timeout_ms == 0 {
            return Err(invalid(
                "preview.history_size and detection_timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detection.scales, vec![1.0, 0.8, 1.2, 0.6, 1.5]);
        assert_eq!(config.stabilizer.idle_reset_ms, 2000);
        assert_eq!(config.preview.min_frame_interval_ms, 100);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "detection": {{ "strategy_timeout_ms": 750, "padding": {{ "top": 0.5 }} }} }}"#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.detection.strategy_timeout_ms, 750);
        assert!((config.detection.padding.top - 0.5).abs() < 1e-6);
        assert!((config.detection.padding.bottom - 0.15).abs() < 1e-6);
        assert_eq!(config.stabilizer, StabilizerConfig::default());
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.detection.scales.clear();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.stabilizer.smoothing_factor = 1.5;
        assert!(config.validate().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "stabilizer": {{ "history_size": 1 }} }}"#).unwrap();
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_json_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(PipelineConfig::load(file.path()), Err(Error::Json(_))));
    }
}
