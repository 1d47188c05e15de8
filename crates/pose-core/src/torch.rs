use std::path::Path;

use anyhow::{Result, bail};
use image::{RgbImage, imageops::FilterType};
use tch::{self, Device, Kind, Tensor};

use crate::{
    estimator::{ConfidenceGate, EstimatorConfig, PoseEstimator},
    landmarks::{LANDMARK_COUNT, Landmark, LandmarkSet},
};

/// Values emitted per landmark: x, y, z, visibility, presence.
const LANDMARK_STRIDE: i64 = 5;

/// TorchScript-backed landmark model wrapper.
///
/// The scripted module takes a `[1, 3, H, W]` float tensor in `0..1` and returns
/// a tuple of `([1, 33, 5] landmarks, [1, 1] pose score)`.
pub struct TorchPoseEstimator {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    gate: ConfidenceGate,
}

impl TorchPoseEstimator {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
        config: EstimatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let module = tch::CModule::load_on_device(model_path, device)?;
        Ok(Self {
            module,
            device,
            input_size,
            gate: ConfidenceGate::new(config),
        })
    }

    /// Converts an RGB frame into a normalized NCHW tensor at the model input size.
    fn rgb_to_tensor(&self, frame: &RgbImage) -> Result<Tensor> {
        let (in_w, in_h) = self.input_size;
        let resized = image::imageops::resize(frame, in_w as u32, in_h as u32, FilterType::Triangle);
        let tensor = Tensor::from_slice(resized.as_raw())
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .permute([0, 3, 1, 2])
            / 255.0;
        Ok(tensor)
    }

    fn decode_output(&self, output: tch::IValue) -> Result<Option<LandmarkSet>> {
        let (landmarks, score) = match output {
            tch::IValue::Tuple(mut values) if values.len() == 2 => {
                let score = values.pop();
                let landmarks = values.pop();
                match (landmarks, score) {
                    (Some(tch::IValue::Tensor(l)), Some(tch::IValue::Tensor(s))) => (l, s),
                    _ => bail!("pose model must return (landmarks, score) tensors"),
                }
            }
            other => bail!("unexpected pose model output: {other:?}"),
        };

        let shape = landmarks.size();
        if shape != [1, LANDMARK_COUNT as i64, LANDMARK_STRIDE] {
            bail!("unexpected landmark tensor shape: {shape:?}");
        }

        let score = score.to_device(Device::Cpu).to_kind(Kind::Float).double_value(&[0, 0]) as f32;
        let flat = Vec::<f32>::try_from(
            &landmarks
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .contiguous()
                .view([-1]),
        )?;

        let points = flat
            .chunks_exact(LANDMARK_STRIDE as usize)
            .map(|row| Landmark {
                x: row[0],
                y: row[1],
                z: row[2],
                visibility: row[3],
                presence: row[4],
            })
            .collect();
        Ok(Some(LandmarkSet::new(points, score)?))
    }
}

impl PoseEstimator for TorchPoseEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        let input = self.rgb_to_tensor(frame)?;
        let output = tch::no_grad(|| self.module.forward_is(&[tch::IValue::Tensor(input)]))?;
        let candidate = self.decode_output(output)?;
        Ok(self.gate.admit(candidate))
    }

    fn describe(&self) -> String {
        format!(
            "TorchScript pose model on {:?} ({}x{} input)",
            self.device, self.input_size.0, self.input_size.1
        )
    }
}
