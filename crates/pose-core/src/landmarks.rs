use serde::{Deserialize, Serialize};

use crate::EstimatorError;

/// Number of joints in the body topology.
pub const LANDMARK_COUNT: usize = 33;

/// Named body joints, in the order the estimator reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    /// Every joint in topology order.
    pub const ALL: [BodyLandmark; LANDMARK_COUNT] = [
        BodyLandmark::Nose,
        BodyLandmark::LeftEyeInner,
        BodyLandmark::LeftEye,
        BodyLandmark::LeftEyeOuter,
        BodyLandmark::RightEyeInner,
        BodyLandmark::RightEye,
        BodyLandmark::RightEyeOuter,
        BodyLandmark::LeftEar,
        BodyLandmark::RightEar,
        BodyLandmark::MouthLeft,
        BodyLandmark::MouthRight,
        BodyLandmark::LeftShoulder,
        BodyLandmark::RightShoulder,
        BodyLandmark::LeftElbow,
        BodyLandmark::RightElbow,
        BodyLandmark::LeftWrist,
        BodyLandmark::RightWrist,
        BodyLandmark::LeftPinky,
        BodyLandmark::RightPinky,
        BodyLandmark::LeftIndex,
        BodyLandmark::RightIndex,
        BodyLandmark::LeftThumb,
        BodyLandmark::RightThumb,
        BodyLandmark::LeftHip,
        BodyLandmark::RightHip,
        BodyLandmark::LeftKnee,
        BodyLandmark::RightKnee,
        BodyLandmark::LeftAnkle,
        BodyLandmark::RightAnkle,
        BodyLandmark::LeftHeel,
        BodyLandmark::RightHeel,
        BodyLandmark::LeftFootIndex,
        BodyLandmark::RightFootIndex,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Fixed connection graph drawn between joints.
pub const POSE_CONNECTIONS: [(BodyLandmark, BodyLandmark); 35] = {
    use BodyLandmark::*;
    [
        (Nose, LeftEyeInner),
        (LeftEyeInner, LeftEye),
        (LeftEye, LeftEyeOuter),
        (LeftEyeOuter, LeftEar),
        (Nose, RightEyeInner),
        (RightEyeInner, RightEye),
        (RightEye, RightEyeOuter),
        (RightEyeOuter, RightEar),
        (MouthLeft, MouthRight),
        (LeftShoulder, RightShoulder),
        (LeftShoulder, LeftElbow),
        (LeftElbow, LeftWrist),
        (LeftWrist, LeftPinky),
        (LeftWrist, LeftIndex),
        (LeftWrist, LeftThumb),
        (LeftPinky, LeftIndex),
        (RightShoulder, RightElbow),
        (RightElbow, RightWrist),
        (RightWrist, RightPinky),
        (RightWrist, RightIndex),
        (RightWrist, RightThumb),
        (RightPinky, RightIndex),
        (LeftShoulder, LeftHip),
        (RightShoulder, RightHip),
        (LeftHip, RightHip),
        (LeftHip, LeftKnee),
        (RightHip, RightKnee),
        (LeftKnee, LeftAnkle),
        (RightKnee, RightAnkle),
        (LeftAnkle, LeftHeel),
        (RightAnkle, RightHeel),
        (LeftHeel, LeftFootIndex),
        (RightHeel, RightFootIndex),
        (LeftAnkle, LeftFootIndex),
        (RightAnkle, RightFootIndex),
    ]
};

/// Single joint position reported by the estimator.
///
/// `x` and `y` are normalized to the image width and height; values outside
/// `[0, 1]` lie beyond the frame edge.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
    pub presence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility: 1.0,
            presence: 1.0,
        }
    }

    /// Convert the normalized position into pixel coordinates.
    ///
    /// Returns `None` when the landmark falls outside the image.
    pub fn to_pixel(&self, width: u32, height: u32) -> Option<(i32, i32)> {
        if !(0.0..=1.0).contains(&self.x) || !(0.0..=1.0).contains(&self.y) {
            return None;
        }
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        let px = (self.x * width as f32).floor().min(max_x);
        let py = (self.y * height as f32).floor().min(max_y);
        Some((px as i32, py as i32))
    }
}

/// Complete body detection: one landmark per joint plus the detection score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    landmarks: Vec<Landmark>,
    score: f32,
}

impl LandmarkSet {
    pub fn new(landmarks: Vec<Landmark>, score: f32) -> Result<Self, EstimatorError> {
        if landmarks.len() != LANDMARK_COUNT {
            return Err(EstimatorError::Topology {
                expected: LANDMARK_COUNT,
                actual: landmarks.len(),
            });
        }
        Ok(Self { landmarks, score })
    }

    pub fn get(&self, joint: BodyLandmark) -> &Landmark {
        &self.landmarks[joint.index()]
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyLandmark, &Landmark)> {
        BodyLandmark::ALL.iter().copied().zip(self.landmarks.iter())
    }

    pub fn as_slice(&self) -> &[Landmark] {
        &self.landmarks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_reference_distinct_joints() {
        for (a, b) in POSE_CONNECTIONS {
            assert_ne!(a, b);
            assert!(a.index() < LANDMARK_COUNT && b.index() < LANDMARK_COUNT);
        }
    }

    #[test]
    fn index_lookup_matches_discriminants() {
        for (idx, joint) in BodyLandmark::ALL.iter().enumerate() {
            assert_eq!(joint.index(), idx);
            assert_eq!(BodyLandmark::from_index(idx), Some(*joint));
        }
        assert_eq!(BodyLandmark::from_index(LANDMARK_COUNT), None);
    }

    #[test]
    fn landmark_set_rejects_wrong_topology() {
        let err = LandmarkSet::new(vec![Landmark::default(); 17], 0.9).unwrap_err();
        assert!(matches!(
            err,
            EstimatorError::Topology {
                expected: 33,
                actual: 17
            }
        ));
    }

    #[test]
    fn pixel_conversion_clips_to_frame() {
        assert_eq!(Landmark::new(0.5, 0.25).to_pixel(100, 40), Some((50, 10)));
        assert_eq!(Landmark::new(1.0, 1.0).to_pixel(100, 40), Some((99, 39)));
        assert_eq!(Landmark::new(-0.01, 0.5).to_pixel(100, 40), None);
        assert_eq!(Landmark::new(0.5, 1.2).to_pixel(100, 40), None);
    }
}
