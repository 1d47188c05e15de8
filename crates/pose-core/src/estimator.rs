use anyhow::Result;
use image::RgbImage;
use thiserror::Error;

use crate::landmarks::LandmarkSet;

/// Failures raised while talking to a pose model backend.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("landmark set must contain {expected} landmarks, got {actual}")]
    Topology { expected: usize, actual: usize },
    #[error("confidence {name} must be within 0.0-1.0, got {value}")]
    Threshold { name: &'static str, value: f32 },
    #[error("pose backend returned an unexpected payload: {0}")]
    Payload(String),
}

/// Thresholds fixed when the estimator is created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    /// Treat every frame as unrelated to the previous one.
    pub static_image_mode: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            static_image_mode: false,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), EstimatorError> {
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EstimatorError::Threshold { name, value });
            }
        }
        Ok(())
    }
}

/// Body landmark model invoked once per image.
///
/// Implementations keep tracking state between calls, so each instance must be
/// driven by one caller at a time.
pub trait PoseEstimator: Send {
    /// Run the model over an RGB frame. `Ok(None)` means no body was found.
    fn estimate(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>>;

    /// Short human readable description used in startup logs.
    fn describe(&self) -> String;
}

impl<T: PoseEstimator + ?Sized> PoseEstimator for Box<T> {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        (**self).estimate(frame)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Applies detection and tracking thresholds to raw model candidates.
///
/// Once a body has been found, the next frame is held to the tracking threshold
/// instead of the detection threshold until a frame comes back empty.
#[derive(Debug, Clone)]
pub struct ConfidenceGate {
    config: EstimatorConfig,
    tracking: bool,
}

impl ConfidenceGate {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            tracking: false,
        }
    }

    /// Threshold the next candidate will be compared against.
    pub fn active_threshold(&self) -> f32 {
        if self.tracking && !self.config.static_image_mode {
            self.config.min_tracking_confidence
        } else {
            self.config.min_detection_confidence
        }
    }

    pub fn admit(&mut self, candidate: Option<LandmarkSet>) -> Option<LandmarkSet> {
        let threshold = self.active_threshold();
        let admitted = candidate.filter(|set| set.score() >= threshold);
        self.tracking = admitted.is_some();
        admitted
    }
}
