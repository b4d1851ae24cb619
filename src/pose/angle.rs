use super::keypoint::{KeypointIndex, Pose};

/// 3点 a-b-c の b における角度（度）
///
/// ba = a - b, bc = c - b として arccos(clip(ba·bc / |ba||bc|, -1, 1))。
/// どちらかのベクトル長が0なら角度は定義できないので None。
pub fn joint_angle(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> Option<f32> {
    let ba = [a[0] - b[0], a[1] - b[1]];
    let bc = [c[0] - b[0], c[1] - b[1]];
    let norm = (ba[0] * ba[0] + ba[1] * ba[1]).sqrt() * (bc[0] * bc[0] + bc[1] * bc[1]).sqrt();
    if norm <= f32::EPSILON {
        return None;
    }
    let cosine = ((ba[0] * bc[0] + ba[1] * bc[1]) / norm).clamp(-1.0, 1.0);
    Some(cosine.acos().to_degrees())
}

/// 腕の角度（肩-肘-手首）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmAngles {
    pub left: f32,
    pub right: f32,
    pub average: f32,
}

/// 左右の肘角度と平均（正規化座標で計算）
pub fn arm_angles(pose: &Pose, threshold: f32) -> Option<ArmAngles> {
    let angle = |shoulder, elbow, wrist| {
        let s = pose.valid(shoulder, threshold)?;
        let e = pose.valid(elbow, threshold)?;
        let w = pose.valid(wrist, threshold)?;
        joint_angle(s.position(), e.position(), w.position())
    };
    let left = angle(
        KeypointIndex::LeftShoulder,
        KeypointIndex::LeftElbow,
        KeypointIndex::LeftWrist,
    )?;
    let right = angle(
        KeypointIndex::RightShoulder,
        KeypointIndex::RightElbow,
        KeypointIndex::RightWrist,
    )?;
    Some(ArmAngles {
        left,
        right,
        average: (left + right) / 2.0,
    })
}

/// 左膝角度（腰-膝-足首）
///
/// フレームサイズが分かる場合はピクセル空間で計算する。
pub fn knee_angle(pose: &Pose, threshold: f32, frame_size: Option<(u32, u32)>) -> Option<f32> {
    let hip = pose.valid(KeypointIndex::LeftHip, threshold)?;
    let knee = pose.valid(KeypointIndex::LeftKnee, threshold)?;
    let ankle = pose.valid(KeypointIndex::LeftAnkle, threshold)?;
    match frame_size {
        Some((w, h)) => {
            let (w, h) = (w as f32, h as f32);
            joint_angle(hip.scaled(w, h), knee.scaled(w, h), ankle.scaled(w, h))
        }
        None => joint_angle(hip.position(), knee.position(), ankle.position()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::keypoint::Keypoint;

    fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_joint_angle_right_angle() {
        let angle = joint_angle([0.0, 1.0], [0.0, 0.0], [1.0, 0.0]).unwrap();
        assert!(approx_eq(angle, 90.0, 1e-4));
    }

    #[test]
    fn test_joint_angle_straight_and_folded() {
        let straight = joint_angle([-1.0, 0.0], [0.0, 0.0], [1.0, 0.0]).unwrap();
        assert!(approx_eq(straight, 180.0, 1e-3));
        let folded = joint_angle([1.0, 0.0], [0.0, 0.0], [2.0, 0.0]).unwrap();
        assert!(approx_eq(folded, 0.0, 1e-3));
    }

    #[test]
    fn test_joint_angle_degenerate() {
        assert_eq!(joint_angle([0.0, 0.0], [0.0, 0.0], [1.0, 0.0]), None);
    }

    #[test]
    fn test_arm_angles_average() {
        let pose = Pose::from_joints([
            (KeypointIndex::LeftShoulder, Keypoint::new(0.0, 1.0, 1.0)),
            (KeypointIndex::LeftElbow, Keypoint::new(0.0, 0.0, 1.0)),
            (KeypointIndex::LeftWrist, Keypoint::new(1.0, 0.0, 1.0)),
            (KeypointIndex::RightShoulder, Keypoint::new(-1.0, 0.0, 1.0)),
            (KeypointIndex::RightElbow, Keypoint::new(0.0, 0.0, 1.0)),
            (KeypointIndex::RightWrist, Keypoint::new(1.0, 0.0, 1.0)),
        ]);
        let arms = arm_angles(&pose, 0.3).unwrap();
        assert!(approx_eq(arms.left, 90.0, 1e-3));
        assert!(approx_eq(arms.right, 180.0, 1e-3));
        assert!(approx_eq(arms.average, 135.0, 1e-3));
    }

    #[test]
    fn test_arm_angles_missing_joint() {
        let pose = Pose::from_joints([
            (KeypointIndex::LeftShoulder, Keypoint::new(0.0, 1.0, 1.0)),
            (KeypointIndex::LeftElbow, Keypoint::new(0.0, 0.0, 1.0)),
            (KeypointIndex::LeftWrist, Keypoint::new(1.0, 0.0, 0.1)),
        ]);
        assert!(arm_angles(&pose, 0.3).is_none());
    }

    #[test]
    fn test_knee_angle_uses_pixel_space() {
        // 正規化座標では45度だが、16:9のピクセル空間では角度が変わる
        let pose = Pose::from_joints([
            (KeypointIndex::LeftHip, Keypoint::new(0.0, 0.0, 1.0)),
            (KeypointIndex::LeftKnee, Keypoint::new(0.0, 1.0, 1.0)),
            (KeypointIndex::LeftAnkle, Keypoint::new(1.0, 0.0, 1.0)),
        ]);
        let normalized = knee_angle(&pose, 0.3, None).unwrap();
        assert!(approx_eq(normalized, 45.0, 1e-3));
        let pixel = knee_angle(&pose, 0.3, Some((1280, 720))).unwrap();
        let expected = (1280.0f32 / 720.0).atan().to_degrees();
        assert!(approx_eq(pixel, expected, 1e-2));
    }
}
