use thiserror::Error;

use crate::orchestrator::StrategyAttempt;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid palace table: landmark {index} appears in both {first} and {second}")]
    DuplicatePalaceIndex {
        index: usize,
        first: &'static str,
        second: &'static str,
    },

    #[error("Invalid palace table: landmark {index} in {palace} is outside the 468-point mesh")]
    PalaceIndexOutOfRange { index: usize, palace: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Detector '{detector}' failed: {message}")]
    Detector {
        detector: &'static str,
        message: String,
    },

    #[error("Face detector model error: {0}")]
    Model(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout {
        operation: &'static str,
        millis: u64,
    },

    #[error("No face detected after {} detection strategies", attempts.len())]
    NoFaceDetected { attempts: Vec<StrategyAttempt> },
}

impl Error {
    /// Create a detector failure error.
    pub fn detector(detector: &'static str, message: impl Into<String>) -> Self {
        Self::Detector {
            detector,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
