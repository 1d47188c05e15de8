//! Rowing stroke analysis over a single detected pose.
//!
//! The rules work on normalized image coordinates (y grows downwards) and pick
//! whichever side of the body faces the camera, judged by where the nose sits
//! relative to the ankles.

use serde::Serialize;

use crate::landmarks::{BodyLandmark, LandmarkSet};

const CATCH_KNEE_ANGLE: f32 = 100.0;
const FINISH_KNEE_ANGLE: f32 = 150.0;
const SEATED_KNEE_MIN: f32 = 80.0;
const CATCH_MIN_HIP_ANGLE: f32 = 40.0;
const DRIVE_MAX_HIP_ANGLE: f32 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    fn of(set: &LandmarkSet, joint: BodyLandmark) -> Self {
        let lm = set.get(joint);
        Self { x: lm.x, y: lm.y }
    }
}

/// Joints used by the stroke rules.
#[derive(Debug, Clone, Copy)]
pub struct KeyLandmarks {
    pub nose: Point,
    pub left_shoulder: Point,
    pub right_shoulder: Point,
    pub left_elbow: Point,
    pub right_elbow: Point,
    pub left_wrist: Point,
    pub right_wrist: Point,
    pub left_hip: Point,
    pub right_hip: Point,
    pub left_knee: Point,
    pub right_knee: Point,
    pub left_ankle: Point,
    pub right_ankle: Point,
}

impl KeyLandmarks {
    pub fn extract(set: &LandmarkSet) -> Self {
        use BodyLandmark::*;
        Self {
            nose: Point::of(set, Nose),
            left_shoulder: Point::of(set, LeftShoulder),
            right_shoulder: Point::of(set, RightShoulder),
            left_elbow: Point::of(set, LeftElbow),
            right_elbow: Point::of(set, RightElbow),
            left_wrist: Point::of(set, LeftWrist),
            right_wrist: Point::of(set, RightWrist),
            left_hip: Point::of(set, LeftHip),
            right_hip: Point::of(set, RightHip),
            left_knee: Point::of(set, LeftKnee),
            right_knee: Point::of(set, RightKnee),
            left_ankle: Point::of(set, LeftAnkle),
            right_ankle: Point::of(set, RightAnkle),
        }
    }

    fn facing_side(&self) -> Side {
        if self.nose.x < self.right_ankle.x && self.nose.x < self.left_ankle.x {
            Side {
                shoulder: self.right_shoulder,
                elbow: self.right_elbow,
                wrist: self.right_wrist,
                hip: self.right_hip,
                knee: self.right_knee,
                ankle: self.right_ankle,
            }
        } else {
            Side {
                shoulder: self.left_shoulder,
                elbow: self.left_elbow,
                wrist: self.left_wrist,
                hip: self.left_hip,
                knee: self.left_knee,
                ankle: self.left_ankle,
            }
        }
    }
}

struct Side {
    shoulder: Point,
    elbow: Point,
    wrist: Point,
    hip: Point,
    knee: Point,
    ankle: Point,
}

/// Angle at `mid` between the rays towards `a` and `b`, in degrees.
///
/// Returns `None` when either ray has zero length.
pub fn joint_angle(a: Point, mid: Point, b: Point) -> Option<f32> {
    let v1 = (a.x - mid.x, -(a.y - mid.y));
    let v2 = (b.x - mid.x, -(b.y - mid.y));
    let mag1 = v1.0.hypot(v1.1);
    let mag2 = v2.0.hypot(v2.1);
    if mag1 == 0.0 || mag2 == 0.0 {
        return None;
    }
    let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (mag1 * mag2)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowingPhase {
    Catch,
    Drive,
    Finish,
    NotRowing,
}

impl RowingPhase {
    pub fn describe(self) -> &'static str {
        match self {
            RowingPhase::Catch => "The person is at the catch.",
            RowingPhase::Drive => "This person is between catch and finish.",
            RowingPhase::Finish => "The person is at the finish.",
            RowingPhase::NotRowing => "The person is not rowing.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowingAnalysis {
    pub phase: RowingPhase,
    pub summary: &'static str,
    pub feedback: Vec<&'static str>,
    pub knee_angle: Option<f32>,
    pub hip_angle: Option<f32>,
}

impl RowingAnalysis {
    fn new(phase: RowingPhase, knee_angle: Option<f32>, hip_angle: Option<f32>) -> Self {
        Self {
            phase,
            summary: phase.describe(),
            feedback: Vec::new(),
            knee_angle,
            hip_angle,
        }
    }
}

pub fn analyze_rowing(set: &LandmarkSet) -> RowingAnalysis {
    let keys = KeyLandmarks::extract(set);
    let nose = keys.nose;
    let s = keys.facing_side();

    let knee_angle = joint_angle(s.ankle, s.knee, s.hip);
    let hip_angle = joint_angle(s.shoulder, s.hip, s.knee);
    let Some(knee) = knee_angle else {
        return RowingAnalysis::new(RowingPhase::NotRowing, knee_angle, hip_angle);
    };
    // A hip angle that cannot be measured fails every hip comparison.
    let hip_below = |limit: f32| hip_angle.is_some_and(|hip| hip < limit);
    let hip_above = |limit: f32| hip_angle.is_some_and(|hip| hip > limit);

    // Ratios may divide by zero; infinities compare the same way the rules expect.
    let not_standing = (s.shoulder.y - s.hip.y).abs() / (s.hip.y - s.ankle.y).abs() > 1.0;
    let arms_low = s.elbow.y < s.hip.y && s.elbow.y < s.ankle.y && s.wrist.y < s.ankle.y;
    let head_far_from_knees = (nose.y - s.knee.y).abs() / (s.knee.x - s.hip.x).abs() > 0.6;
    let not_sitting = knee > CATCH_KNEE_ANGLE || knee < SEATED_KNEE_MIN;

    if !(not_standing && arms_low && !head_far_from_knees && not_sitting) {
        return RowingAnalysis::new(RowingPhase::NotRowing, knee_angle, hip_angle);
    }

    if knee < CATCH_KNEE_ANGLE {
        let mut analysis = RowingAnalysis::new(RowingPhase::Catch, knee_angle, hip_angle);
        if (s.elbow.x - s.knee.x).abs() > (s.knee.x - s.ankle.x).abs() {
            analysis.feedback.push(if hip_below(CATCH_MIN_HIP_ANGLE) {
                "Straighten your back and lean less forward at the catch."
            } else {
                "Lean forward at the catch."
            });
        }
        analysis
    } else if knee > FINISH_KNEE_ANGLE {
        let mut analysis = RowingAnalysis::new(RowingPhase::Finish, knee_angle, hip_angle);
        if (s.knee.x - s.elbow.x).abs() < (s.elbow.x - s.shoulder.x).abs() {
            analysis
                .feedback
                .push("Place your hands close to your chest at the finish.");
        }
        if (s.wrist.y - s.hip.y).abs() > (s.wrist.y - s.shoulder.y).abs() {
            analysis.feedback.push("Place your wrists lower at the finish.");
        }
        analysis
    } else {
        let mut analysis = RowingAnalysis::new(RowingPhase::Drive, knee_angle, hip_angle);
        if hip_above(DRIVE_MAX_HIP_ANGLE) {
            analysis
                .feedback
                .push("Lean forward as you approach the catch.");
        }
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{LANDMARK_COUNT, Landmark};

    fn pose(points: &[(BodyLandmark, f32, f32)]) -> LandmarkSet {
        let mut landmarks = vec![Landmark::new(0.5, 0.5); LANDMARK_COUNT];
        for (joint, x, y) in points {
            landmarks[joint.index()] = Landmark::new(*x, *y);
        }
        LandmarkSet::new(landmarks, 0.9).unwrap()
    }

    /// Rower seen side-on with both legs overlapping and feet on the left.
    fn rower(
        nose: (f32, f32),
        knee: (f32, f32),
        hip: (f32, f32),
        shoulder: (f32, f32),
        elbow: (f32, f32),
        wrist: (f32, f32),
    ) -> LandmarkSet {
        use BodyLandmark::*;
        let ankle = (0.2, 0.8);
        pose(&[
            (Nose, nose.0, nose.1),
            (LeftAnkle, ankle.0, ankle.1),
            (RightAnkle, ankle.0, ankle.1),
            (LeftKnee, knee.0, knee.1),
            (RightKnee, knee.0, knee.1),
            (LeftHip, hip.0, hip.1),
            (RightHip, hip.0, hip.1),
            (LeftShoulder, shoulder.0, shoulder.1),
            (RightShoulder, shoulder.0, shoulder.1),
            (LeftElbow, elbow.0, elbow.1),
            (RightElbow, elbow.0, elbow.1),
            (LeftWrist, wrist.0, wrist.1),
            (RightWrist, wrist.0, wrist.1),
        ])
    }

    #[test]
    fn right_angle_is_ninety_degrees() {
        let angle = joint_angle(
            Point { x: 1.0, y: 0.0 },
            Point { x: 0.0, y: 0.0 },
            Point { x: 0.0, y: 1.0 },
        )
        .unwrap();
        assert!((angle - 90.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_ray_has_no_angle() {
        let p = Point { x: 0.3, y: 0.3 };
        assert!(joint_angle(p, p, Point { x: 0.0, y: 0.0 }).is_none());
    }

    #[test]
    fn standing_figure_is_not_rowing() {
        use BodyLandmark::*;
        let set = pose(&[
            (Nose, 0.5, 0.1),
            (LeftShoulder, 0.55, 0.25),
            (LeftElbow, 0.56, 0.4),
            (LeftWrist, 0.56, 0.5),
            (LeftHip, 0.54, 0.55),
            (LeftKnee, 0.54, 0.75),
            (LeftAnkle, 0.54, 0.95),
            (RightAnkle, 0.46, 0.95),
        ]);
        assert_eq!(analyze_rowing(&set).phase, RowingPhase::NotRowing);
    }

    #[test]
    fn compressed_legs_are_at_the_catch() {
        // Knee high above a low hip; shoulders leaning forward over the knees.
        let set = rower(
            (0.3, 0.58),
            (0.3, 0.6),
            (0.4, 0.78),
            (0.32, 0.55),
            (0.28, 0.6),
            (0.22, 0.62),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Catch);
        assert!(analysis.knee_angle.unwrap() < CATCH_KNEE_ANGLE);
    }

    #[test]
    fn head_far_above_knees_is_not_rowing() {
        let set = rower(
            (0.3, 0.1),
            (0.3, 0.6),
            (0.4, 0.78),
            (0.32, 0.55),
            (0.28, 0.6),
            (0.22, 0.62),
        );
        assert_eq!(analyze_rowing(&set).phase, RowingPhase::NotRowing);
    }

    #[test]
    fn extended_legs_are_at_the_finish() {
        let set = rower(
            (0.45, 0.7),
            (0.4, 0.78),
            (0.6, 0.78),
            (0.66, 0.6),
            (0.7, 0.7),
            (0.62, 0.7),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Finish);
        assert_eq!(analysis.summary, "The person is at the finish.");
        assert!(analysis.feedback.is_empty());
    }

    #[test]
    fn hunched_catch_is_told_to_straighten() {
        // Elbows reach well past the knees with the torso folded flat.
        let set = rower(
            (0.3, 0.58),
            (0.3, 0.6),
            (0.4, 0.78),
            (0.32, 0.55),
            (0.45, 0.6),
            (0.22, 0.62),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Catch);
        assert!(analysis.hip_angle.unwrap() < CATCH_MIN_HIP_ANGLE);
        assert_eq!(
            analysis.feedback,
            ["Straighten your back and lean less forward at the catch."]
        );
    }

    #[test]
    fn upright_catch_is_told_to_lean_forward() {
        let set = rower(
            (0.3, 0.58),
            (0.3, 0.6),
            (0.4, 0.78),
            (0.5, 0.55),
            (0.45, 0.6),
            (0.22, 0.62),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Catch);
        assert_eq!(analysis.summary, "The person is at the catch.");
        assert_eq!(analysis.feedback, ["Lean forward at the catch."]);
    }

    #[test]
    fn half_extended_legs_are_in_the_drive() {
        let set = rower(
            (0.4, 0.65),
            (0.35, 0.7),
            (0.55, 0.78),
            (0.5, 0.55),
            (0.45, 0.62),
            (0.4, 0.64),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Drive);
        assert_eq!(analysis.summary, "This person is between catch and finish.");
        assert!(analysis.feedback.is_empty());
    }

    #[test]
    fn open_hips_in_the_drive_are_told_to_lean() {
        let set = rower(
            (0.4, 0.65),
            (0.35, 0.7),
            (0.55, 0.78),
            (0.75, 0.6),
            (0.5, 0.66),
            (0.45, 0.66),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Drive);
        assert!(analysis.hip_angle.unwrap() > DRIVE_MAX_HIP_ANGLE);
        assert_eq!(analysis.feedback, ["Lean forward as you approach the catch."]);
    }

    #[test]
    fn finish_with_hands_away_from_chest() {
        let set = rower(
            (0.45, 0.7),
            (0.4, 0.78),
            (0.6, 0.78),
            (0.66, 0.6),
            (0.5, 0.7),
            (0.62, 0.7),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Finish);
        assert_eq!(
            analysis.feedback,
            ["Place your hands close to your chest at the finish."]
        );
    }

    #[test]
    fn finish_with_wrists_near_shoulders() {
        let set = rower(
            (0.45, 0.7),
            (0.4, 0.78),
            (0.6, 0.78),
            (0.66, 0.6),
            (0.7, 0.7),
            (0.62, 0.62),
        );
        let analysis = analyze_rowing(&set);
        assert_eq!(analysis.phase, RowingPhase::Finish);
        assert_eq!(analysis.feedback, ["Place your wrists lower at the finish."]);
    }

    #[test]
    fn unmeasurable_hip_still_reports_knee_angle() {
        // Shoulder collapsed onto the hip: no hip angle, knee angle intact.
        let set = rower(
            (0.3, 0.58),
            (0.3, 0.6),
            (0.4, 0.78),
            (0.4, 0.78),
            (0.45, 0.6),
            (0.22, 0.62),
        );
        let analysis = analyze_rowing(&set);
        assert!(analysis.hip_angle.is_none());
        assert!(analysis.knee_angle.is_some());
        assert_eq!(analysis.phase, RowingPhase::NotRowing);
    }
}
