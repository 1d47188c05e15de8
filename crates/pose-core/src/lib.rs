//! Body pose model seam: the landmark topology, the estimator capability and its
//! backends, and stroke analysis over a detected pose.

pub mod analysis;
pub mod estimator;
pub mod landmarks;
pub mod remote;
#[cfg(feature = "with-tch")]
pub mod torch;

pub use analysis::{RowingAnalysis, RowingPhase, analyze_rowing};
pub use estimator::{ConfidenceGate, EstimatorConfig, EstimatorError, PoseEstimator};
pub use landmarks::{BodyLandmark, LANDMARK_COUNT, Landmark, LandmarkSet, POSE_CONNECTIONS};
pub use remote::RemotePoseEstimator;

#[cfg(feature = "with-tch")]
pub use tch;
