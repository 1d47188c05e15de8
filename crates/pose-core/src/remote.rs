//! HTTP client for an out-of-process pose inference service.
//!
//! The service receives a PNG encoded RGB frame and answers with the best
//! body candidate it found:
//!
//! ```json
//! {"score": 0.93, "landmarks": [[x, y, z, visibility, presence], ...]}
//! ```
//!
//! `landmarks` is `null` when nothing was detected.

use std::{io::Cursor, time::Duration};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    estimator::{ConfidenceGate, EstimatorConfig, EstimatorError, PoseEstimator},
    landmarks::{Landmark, LandmarkSet},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct InferenceReply {
    #[serde(default)]
    score: f32,
    landmarks: Option<Vec<[f32; 5]>>,
}

pub struct RemotePoseEstimator {
    client: Client,
    endpoint: String,
    gate: ConfidenceGate,
}

impl RemotePoseEstimator {
    pub fn new(endpoint: impl Into<String>, config: EstimatorConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build pose service HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            gate: ConfidenceGate::new(config),
        })
    }
}

impl PoseEstimator for RemotePoseEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<Option<LandmarkSet>> {
        let mut body = Vec::new();
        frame
            .write_to(&mut Cursor::new(&mut body), ImageFormat::Png)
            .context("failed to encode frame for pose service")?;

        let reply: InferenceReply = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(body)
            .send()
            .with_context(|| format!("pose service request to {} failed", self.endpoint))?
            .error_for_status()
            .context("pose service rejected the frame")?
            .json()
            .context("pose service returned malformed JSON")?;

        let candidate = parse_reply(reply)?;
        debug!(
            score = candidate.as_ref().map(LandmarkSet::score),
            threshold = self.gate.active_threshold(),
            "pose service replied"
        );
        Ok(self.gate.admit(candidate))
    }

    fn describe(&self) -> String {
        format!("remote pose service at {}", self.endpoint)
    }
}

fn parse_reply(reply: InferenceReply) -> Result<Option<LandmarkSet>, EstimatorError> {
    let Some(rows) = reply.landmarks else {
        return Ok(None);
    };
    if !reply.score.is_finite() {
        return Err(EstimatorError::Payload(format!(
            "non-finite score {}",
            reply.score
        )));
    }
    let landmarks = rows
        .into_iter()
        .map(|[x, y, z, visibility, presence]| Landmark {
            x,
            y,
            z,
            visibility,
            presence,
        })
        .collect();
    LandmarkSet::new(landmarks, reply.score).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_landmarks_mean_no_detection() {
        let reply: InferenceReply = serde_json::from_str(r#"{"score": 0.0, "landmarks": null}"#).unwrap();
        assert!(parse_reply(reply).unwrap().is_none());
    }

    #[test]
    fn full_topology_is_accepted() {
        let rows = vec![[0.5, 0.5, 0.0, 1.0, 1.0]; 33];
        let json = serde_json::json!({ "score": 0.7, "landmarks": rows });
        let reply: InferenceReply = serde_json::from_value(json).unwrap();
        let set = parse_reply(reply).unwrap().unwrap();
        assert_eq!(set.as_slice().len(), 33);
        assert_eq!(set.score(), 0.7);
    }

    #[test]
    fn truncated_topology_is_an_error() {
        let rows = vec![[0.5, 0.5, 0.0, 1.0, 1.0]; 12];
        let json = serde_json::json!({ "score": 0.7, "landmarks": rows });
        let reply: InferenceReply = serde_json::from_value(json).unwrap();
        assert!(matches!(
            parse_reply(reply),
            Err(EstimatorError::Topology { actual: 12, .. })
        ));
    }
}
