use anyhow::{Context, Result};
use pose_core::{PoseEstimator, RemotePoseEstimator};

use crate::service::config::{BackendConfig, EstimatorSettings};

/// Build one estimator instance for the configured backend.
pub fn build_estimator(settings: &EstimatorSettings) -> Result<Box<dyn PoseEstimator>> {
    match &settings.backend {
        BackendConfig::Remote { endpoint } => {
            let estimator = RemotePoseEstimator::new(endpoint.clone(), settings.thresholds)
                .with_context(|| format!("failed to build remote estimator for {endpoint}"))?;
            Ok(Box::new(estimator))
        }
        #[cfg(feature = "with-tch")]
        BackendConfig::Torch {
            model_path,
            input_size,
            use_cpu,
        } => {
            use pose_core::{tch::Device, torch::TorchPoseEstimator};

            let device = if *use_cpu {
                Device::Cpu
            } else {
                Device::cuda_if_available()
            };
            let side = i64::from(*input_size);
            let estimator =
                TorchPoseEstimator::new(model_path, device, (side, side), settings.thresholds)
                    .with_context(|| format!("failed to load {}", model_path.display()))?;
            Ok(Box::new(estimator))
        }
    }
}
